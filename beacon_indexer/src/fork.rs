use store::rows::ForkRow;
use types::primitives::{ForkId, Slot, H256};

use crate::block::Block;

/// A branch of the block DAG above the finalized boundary.
///
/// `base` is the common ancestor the branch diverged from, `leaf` the tip
/// observed when the fork was created. Fork 0 is the initial chain and has
/// no entity of its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fork {
    pub fork_id: ForkId,
    pub base_slot: Slot,
    pub base_root: H256,
    pub leaf_slot: Slot,
    pub leaf_root: H256,
    pub parent_fork: ForkId,
}

impl Fork {
    #[must_use]
    pub(crate) fn new(fork_id: ForkId, base: &Block, leaf: &Block, parent_fork: ForkId) -> Self {
        Self {
            fork_id,
            base_slot: base.slot(),
            base_root: base.root(),
            leaf_slot: leaf.slot(),
            leaf_root: leaf.root(),
            parent_fork,
        }
    }

    #[must_use]
    pub fn to_row(&self) -> ForkRow {
        ForkRow {
            fork_id: self.fork_id,
            base_slot: self.base_slot,
            base_root: self.base_root.as_bytes().to_vec(),
            leaf_slot: self.leaf_slot,
            leaf_root: self.leaf_root.as_bytes().to_vec(),
            parent_fork: self.parent_fork,
        }
    }

    #[must_use]
    pub fn from_row(row: &ForkRow) -> Self {
        Self {
            fork_id: row.fork_id,
            base_slot: row.base_slot,
            base_root: H256::from_slice(&row.base_root),
            leaf_slot: row.leaf_slot,
            leaf_root: H256::from_slice(&row.leaf_root),
            parent_fork: row.parent_fork,
        }
    }
}
