//! Storage encoding for headers, block bodies and payload metadata.
//!
//! Headers are stored in their fixed 208-byte wire layout. Bodies and
//! payload metadata are stored as version-tagged blobs: version 1 is the
//! plain serialized form, version 2 is snappy-compressed. The rest of the
//! system treats these blobs as opaque.

use anyhow::{ensure, Result};
use snap::raw::{Decoder, Encoder};
use thiserror::Error;

use crate::{
    containers::{ExecutionPayloadMeta, SignedBlockHeader, VersionedSignedBlock},
    primitives::{SignatureBytes, H256},
};

pub const HEADER_VERSION: u8 = 1;
pub const BLOB_VERSION_PLAIN: u8 = 1;
pub const BLOB_VERSION_SNAPPY: u8 = 2;

const SIGNED_HEADER_LENGTH: usize = 208;

#[derive(Debug, Error)]
pub enum Error {
    #[error("encoded header has the wrong length: {length}")]
    WrongHeaderLength { length: usize },
    #[error("unknown blob version: {version}")]
    UnknownBlobVersion { version: u8 },
}

#[must_use]
pub fn encode_signed_header(header: &SignedBlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(SIGNED_HEADER_LENGTH);

    bytes.extend_from_slice(&header.message.slot.to_le_bytes());
    bytes.extend_from_slice(&header.message.proposer_index.to_le_bytes());
    bytes.extend_from_slice(header.message.parent_root.as_bytes());
    bytes.extend_from_slice(header.message.state_root.as_bytes());
    bytes.extend_from_slice(header.message.body_root.as_bytes());
    bytes.extend_from_slice(header.signature.as_bytes());

    bytes
}

pub fn decode_signed_header(bytes: &[u8]) -> Result<SignedBlockHeader> {
    ensure!(
        bytes.len() == SIGNED_HEADER_LENGTH,
        Error::WrongHeaderLength {
            length: bytes.len()
        },
    );

    let u64_at = |offset: usize| {
        u64::from_le_bytes(
            bytes[offset..offset + 8]
                .try_into()
                .expect("length is checked above"),
        )
    };

    Ok(SignedBlockHeader {
        message: crate::containers::BlockHeader {
            slot: u64_at(0),
            proposer_index: u64_at(8),
            parent_root: H256::from_slice(&bytes[16..48]),
            state_root: H256::from_slice(&bytes[48..80]),
            body_root: H256::from_slice(&bytes[80..112]),
        },
        signature: SignatureBytes::from_slice(&bytes[112..208]),
    })
}

pub fn marshal_versioned_signed_block(
    block: &VersionedSignedBlock,
    compress: bool,
) -> Result<(u8, Vec<u8>)> {
    marshal(block, compress)
}

pub fn unmarshal_versioned_signed_block(version: u8, bytes: &[u8]) -> Result<VersionedSignedBlock> {
    unmarshal(version, bytes)
}

pub fn marshal_execution_payload(
    payload: &ExecutionPayloadMeta,
    compress: bool,
) -> Result<(u8, Vec<u8>)> {
    marshal(payload, compress)
}

pub fn unmarshal_execution_payload(version: u8, bytes: &[u8]) -> Result<ExecutionPayloadMeta> {
    unmarshal(version, bytes)
}

fn marshal(value: &impl serde::Serialize, compress: bool) -> Result<(u8, Vec<u8>)> {
    let plain = serde_json::to_vec(value)?;

    if compress {
        let compressed = Encoder::new().compress_vec(&plain)?;
        Ok((BLOB_VERSION_SNAPPY, compressed))
    } else {
        Ok((BLOB_VERSION_PLAIN, plain))
    }
}

fn unmarshal<T: serde::de::DeserializeOwned>(version: u8, bytes: &[u8]) -> Result<T> {
    match version {
        BLOB_VERSION_PLAIN => Ok(serde_json::from_slice(bytes)?),
        BLOB_VERSION_SNAPPY => {
            let plain = Decoder::new().decompress_vec(bytes)?;
            Ok(serde_json::from_slice(&plain)?)
        }
        _ => Err(Error::UnknownBlobVersion { version }.into()),
    }
}
