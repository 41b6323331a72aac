//! Row types shared between the query modules and their callers.
//!
//! Roots and hashes are raw byte vectors here; typed wrappers stay on the
//! indexer side of the boundary.

use anyhow::Result;

use crate::{Error, StoreRow};

/// Processing state of an unfinalized block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UnfinalizedBlockStatus {
    Pending = 0,
    Processed = 1,
    Imported = 2,
    Failed = 3,
}

impl TryFrom<u8> for UnfinalizedBlockStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Processed),
            2 => Ok(Self::Imported),
            3 => Ok(Self::Failed),
            _ => Err(Error::ColumnOutOfRange { column: 0 }.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotStatus {
    Missed = 0,
    Canonical = 1,
    Orphaned = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlashingReason {
    ProposerSlashing = 1,
    AttesterSlashing = 2,
}

impl TryFrom<u8> for SlashingReason {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::ProposerSlashing),
            2 => Ok(Self::AttesterSlashing),
            _ => Err(Error::ColumnOutOfRange { column: 0 }.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnfinalizedBlockRow {
    pub root: Vec<u8>,
    pub slot: u64,
    pub header_ver: u8,
    pub header_ssz: Vec<u8>,
    pub block_ver: u8,
    pub block_ssz: Vec<u8>,
    pub status: UnfinalizedBlockStatus,
    pub fork_id: u64,
    pub payload_ver: Option<u8>,
    pub payload_ssz: Option<Vec<u8>>,
}

impl UnfinalizedBlockRow {
    pub(crate) fn from_row(row: &StoreRow) -> Result<Self> {
        Ok(Self {
            root: row.get_bytes(0)?,
            slot: row.get_u64(1)?,
            header_ver: row.get_u8(2)?,
            header_ssz: row.get_bytes(3)?,
            block_ver: row.get_u8(4)?,
            block_ssz: row.get_bytes(5)?,
            status: row.get_u8(6)?.try_into()?,
            fork_id: row.get_u64(7)?,
            payload_ver: row.get_opt_u8(8)?,
            payload_ssz: row.get_opt_bytes(9)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct OrphanedBlockRow {
    pub root: Vec<u8>,
    pub header_ver: u8,
    pub header_ssz: Vec<u8>,
    pub block_ver: u8,
    pub block_ssz: Vec<u8>,
    pub payload_ver: Option<u8>,
    pub payload_ssz: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct SlotRow {
    pub slot: u64,
    pub root: Vec<u8>,
    pub status: SlotStatus,
    pub proposer: Option<u64>,
    pub parent_root: Option<Vec<u8>>,
    pub state_root: Option<Vec<u8>>,
    pub graffiti: Option<Vec<u8>>,
    pub eth_block_number: Option<u64>,
    pub eth_block_hash: Option<Vec<u8>>,
    pub eth_block_extra: Option<Vec<u8>>,
    pub fork_id: u64,
    pub has_payload: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct EpochRow {
    pub epoch: u64,
    pub block_count: u64,
    pub payload_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForkRow {
    pub fork_id: u64,
    pub base_slot: u64,
    pub base_root: Vec<u8>,
    pub leaf_slot: u64,
    pub leaf_root: Vec<u8>,
    pub parent_fork: u64,
}

#[derive(Clone, Debug)]
pub struct DepositTxRow {
    pub deposit_index: u64,
    pub block_number: u64,
    pub block_time: u64,
    pub block_root: Vec<u8>,
    pub publickey: Vec<u8>,
    pub withdrawal_credentials: Vec<u8>,
    pub amount: u64,
    pub signature: Vec<u8>,
    pub valid_signature: u8,
    pub orphaned: bool,
    pub tx_hash: Vec<u8>,
    pub tx_sender: Vec<u8>,
    pub tx_target: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct DepositRow {
    /// Canonical deposit index; unknown for orphaned deposits.
    pub deposit_index: Option<u64>,
    pub slot_number: u64,
    pub slot_index: u64,
    pub slot_root: Vec<u8>,
    pub orphaned: bool,
    pub publickey: Vec<u8>,
    pub withdrawal_credentials: Vec<u8>,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoluntaryExitRow {
    pub slot_number: u64,
    pub slot_index: u64,
    pub slot_root: Vec<u8>,
    pub orphaned: bool,
    pub validator: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashingRow {
    pub slot_number: u64,
    pub slot_index: u64,
    pub slot_root: Vec<u8>,
    pub orphaned: bool,
    pub validator: u64,
    pub slasher: u64,
    pub reason: SlashingReason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsolidationRow {
    pub slot_number: u64,
    pub slot_index: u64,
    pub slot_root: Vec<u8>,
    pub orphaned: bool,
    pub source_index: u64,
    pub target_index: u64,
    pub epoch: u64,
}
