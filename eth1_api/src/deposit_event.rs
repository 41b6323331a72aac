// `DepositEvent` logs lay out their five fields as ABI-encoded dynamic
// `bytes` even though every field is fixed in size (each line below is one
// EVM word):
//
// ```text
// offsets  pubkey, withdrawal_credentials, amount, signature, index (5 words)
// pubkey   length word, 48 bytes of data, 16 bytes of padding
// creds    length word, 32 bytes of data
// amount   length word, 8 bytes little-endian, 24 bytes of padding
// sig      length word, 96 bytes of data
// index    length word, 8 bytes little-endian, 24 bytes of padding
// ```
//
// Since every offset and length is constant, decoding reduces to slicing the
// payload at fixed positions. The raw layout below exists only to compute
// those positions; `span_of!` keeps them in sync with the struct.

use anyhow::{ensure, Error as AnyhowError};
use hex_literal::hex;
use memoffset::span_of;
use static_assertions::assert_eq_size;
use thiserror::Error;
use types::primitives::{DepositIndex, Gwei, PublicKeyBytes, SignatureBytes, H256};
use web3::types::Log;

#[derive(Debug, Error)]
enum Error {
    #[error("log has unexpected topics: {log:?}")]
    UnexpectedTopics { log: Log },
    #[error("log has been removed: {log:?}")]
    Removed { log: Log },
    #[error("log data has the wrong length: {log:?}")]
    WrongLength { log: Log },
}

type EvmWord = [u8; 32];

#[repr(C)]
struct RawDepositEvent {
    _pubkey_offset: EvmWord,
    _withdrawal_credentials_offset: EvmWord,
    _amount_offset: EvmWord,
    _signature_offset: EvmWord,
    _index_offset: EvmWord,
    _pubkey_length: EvmWord,
    pubkey: [u8; 48],
    _pubkey_padding: [u8; 16],
    _withdrawal_credentials_length: EvmWord,
    withdrawal_credentials: [u8; 32],
    _amount_length: EvmWord,
    amount: [u8; 8],
    _amount_padding: [u8; 24],
    _signature_length: EvmWord,
    signature: [u8; 96],
    _index_length: EvmWord,
    index: [u8; 8],
    _index_padding: [u8; 24],
}

assert_eq_size!(RawDepositEvent, [EvmWord; 18]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositEvent {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    pub amount: Gwei,
    pub signature: SignatureBytes,
    pub index: DepositIndex,
}

impl TryFrom<Log> for DepositEvent {
    type Error = AnyhowError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        ensure!(log.topics == [Self::TOPIC], Error::UnexpectedTopics { log });

        ensure!(!log.is_removed(), Error::Removed { log });

        let log_data = log.data.0.as_slice();

        ensure!(log_data.len() == Self::LENGTH, Error::WrongLength { log });

        let pubkey = PublicKeyBytes::from_slice(&log_data[span_of!(RawDepositEvent, pubkey)]);

        let withdrawal_credentials =
            H256::from_slice(&log_data[span_of!(RawDepositEvent, withdrawal_credentials)]);

        let amount = Gwei::from_le_bytes(
            log_data[span_of!(RawDepositEvent, amount)]
                .try_into()
                .expect("length is checked above"),
        );

        let signature = SignatureBytes::from_slice(&log_data[span_of!(RawDepositEvent, signature)]);

        let index = DepositIndex::from_le_bytes(
            log_data[span_of!(RawDepositEvent, index)]
                .try_into()
                .expect("length is checked above"),
        );

        Ok(Self {
            pubkey,
            withdrawal_credentials,
            amount,
            signature,
            index,
        })
    }
}

impl DepositEvent {
    /// Keccak-256 hash of `DepositEvent(bytes,bytes,bytes,bytes,bytes)`.
    pub const TOPIC: H256 = H256(hex!(
        "649bbc62d0e31342afea4e5cd82d4049e7e1ee912fc0889aa790803be39038c5"
    ));

    pub const LENGTH: usize = core::mem::size_of::<RawDepositEvent>();
}
