//! Consensus-layer containers in the shape the Beacon Node API serves them.
//!
//! Only the parts of a block the explorer indexes are modeled. Everything
//! else in the upstream JSON is ignored during deserialization, so new block
//! fields introduced by future forks do not break ingestion.

use serde::{Deserialize, Serialize};

use crate::{
    primitives::{
        Epoch, ExecutionBlockHash, ExecutionBlockNumber, Gwei, PublicKeyBytes, SignatureBytes,
        Slot, UnixSeconds, ValidatorIndex, H256,
    },
    serde_utils::{prefixed_hex, quoted_u64, quoted_u64_sequence},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Checkpoint {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockHeader {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    #[serde(with = "quoted_u64")]
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body_root: H256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedBlockHeader {
    pub message: BlockHeader,
    pub signature: SignatureBytes,
}

/// Consensus fork the block was produced under.
///
/// The explorer does not interpret fork-specific fields beyond what
/// [`BlockBody`] models, but the version is preserved end to end so stored
/// blocks can be re-served faithfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockVersion {
    Phase0,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
    Electra,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DepositData {
    pub pubkey: PublicKeyBytes,
    pub withdrawal_credentials: H256,
    #[serde(with = "quoted_u64")]
    pub amount: Gwei,
    pub signature: SignatureBytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Deposit {
    pub data: DepositData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoluntaryExit {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
    #[serde(with = "quoted_u64")]
    pub validator_index: ValidatorIndex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: SignatureBytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBlockHeader,
    pub signed_header_2: SignedBlockHeader,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexedAttestation {
    #[serde(with = "quoted_u64_sequence")]
    pub attesting_indices: Vec<ValidatorIndex>,
    pub signature: SignatureBytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Consolidation {
    #[serde(with = "quoted_u64")]
    pub source_index: ValidatorIndex,
    #[serde(with = "quoted_u64")]
    pub target_index: ValidatorIndex,
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
}

/// The subset of execution payload fields the explorer extracts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionPayloadMeta {
    pub block_hash: ExecutionBlockHash,
    #[serde(with = "quoted_u64")]
    pub block_number: ExecutionBlockNumber,
    #[serde(with = "quoted_u64")]
    pub timestamp: UnixSeconds,
    #[serde(with = "prefixed_hex")]
    pub extra_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockBody {
    pub graffiti: H256,
    #[serde(default)]
    pub proposer_slashings: Vec<ProposerSlashing>,
    #[serde(default)]
    pub attester_slashings: Vec<AttesterSlashing>,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    #[serde(default)]
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
    #[serde(default)]
    pub consolidations: Vec<Consolidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_payload: Option<ExecutionPayloadMeta>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BeaconBlock {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    #[serde(with = "quoted_u64")]
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body: BlockBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignedBeaconBlock {
    pub message: BeaconBlock,
    pub signature: SignatureBytes,
}

/// A signed block together with the fork it belongs to, matching the
/// `{version, data}` envelope of `GET /eth/v2/beacon/blocks/{block_id}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionedSignedBlock {
    pub version: BlockVersion,
    pub data: SignedBeaconBlock,
}

impl VersionedSignedBlock {
    #[must_use]
    pub const fn message(&self) -> &BeaconBlock {
        &self.data.message
    }

    #[must_use]
    pub const fn body(&self) -> &BlockBody {
        &self.data.message.body
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.data.message.slot
    }

    #[must_use]
    pub const fn parent_root(&self) -> H256 {
        self.data.message.parent_root
    }

    #[must_use]
    pub const fn graffiti(&self) -> H256 {
        self.body().graffiti
    }

    #[must_use]
    pub fn execution_payload(&self) -> Option<&ExecutionPayloadMeta> {
        self.body().execution_payload.as_ref()
    }

    #[must_use]
    pub fn execution_block_hash(&self) -> Option<ExecutionBlockHash> {
        self.execution_payload().map(|payload| payload.block_hash)
    }

    #[must_use]
    pub fn execution_block_number(&self) -> Option<ExecutionBlockNumber> {
        self.execution_payload().map(|payload| payload.block_number)
    }

    #[must_use]
    pub fn has_execution_payload(&self) -> bool {
        self.execution_payload().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_block_deserializes_api_envelope() {
        let json = r#"{
            "version": "electra",
            "data": {
                "message": {
                    "slot": "123456",
                    "proposer_index": "42",
                    "parent_root": "0x0101010101010101010101010101010101010101010101010101010101010101",
                    "state_root": "0x0202020202020202020202020202020202020202020202020202020202020202",
                    "body": {
                        "graffiti": "0x0303030303030303030303030303030303030303030303030303030303030303",
                        "deposits": [],
                        "voluntary_exits": [
                            {
                                "message": {"epoch": "7", "validator_index": "11"},
                                "signature": "0x000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000"
                            }
                        ],
                        "execution_payload": {
                            "block_hash": "0x0404040404040404040404040404040404040404040404040404040404040404",
                            "block_number": "17000000",
                            "timestamp": "1700000000",
                            "extra_data": "0x626f783031"
                        },
                        "unknown_future_field": {"ignored": true}
                    }
                },
                "signature": "0x000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000"
            }
        }"#;

        let block =
            serde_json::from_str::<VersionedSignedBlock>(json).expect("JSON should be valid");

        assert_eq!(block.version, BlockVersion::Electra);
        assert_eq!(block.slot(), 123_456);
        assert_eq!(block.parent_root(), H256::repeat_byte(1));
        assert_eq!(block.execution_block_number(), Some(17_000_000));
        assert_eq!(block.body().voluntary_exits.len(), 1);
        assert_eq!(block.body().voluntary_exits[0].message.validator_index, 11);
        assert!(block.has_execution_payload());
    }

    #[test]
    fn pre_merge_body_has_no_payload() {
        let json = r#"{
            "graffiti": "0x0000000000000000000000000000000000000000000000000000000000000000"
        }"#;

        let body = serde_json::from_str::<BlockBody>(json).expect("JSON should be valid");

        assert!(body.execution_payload.is_none());
        assert!(body.deposits.is_empty());
    }
}
