use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use types::{
    config::ChainConfig,
    primitives::{Epoch, ForkId, Slot, H256},
};

use crate::block::Block;

/// Canonical in-memory index of all blocks above the finalized boundary,
/// keyed by root.
///
/// The map lock is only held across single lookups and insertions. Ancestor
/// walks re-acquire it per hop, so they tolerate concurrent insertions and
/// simply stop when a parent is unknown.
#[derive(Default)]
pub struct BlockCache {
    blocks: RwLock<HashMap<H256, Arc<Block>>>,
}

impl BlockCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_by_root(&self, root: H256) -> Option<Arc<Block>> {
        self.blocks
            .read()
            .expect("block cache lock is poisoned")
            .get(&root)
            .cloned()
    }

    /// Returns the cached block for `root`, creating it when absent.
    /// At most one `Block` is ever constructed per root.
    pub fn insert_or_get(&self, root: H256, slot: Slot) -> (Arc<Block>, bool) {
        let mut blocks = self.blocks.write().expect("block cache lock is poisoned");

        if let Some(block) = blocks.get(&root) {
            return (block.clone(), false);
        }

        let block = Arc::new(Block::new(root, slot));
        blocks.insert(root, block.clone());

        (block, true)
    }

    /// All cached blocks currently labeled with the given fork.
    #[must_use]
    pub fn get_fork_blocks(&self, fork_id: ForkId) -> Vec<Arc<Block>> {
        self.blocks
            .read()
            .expect("block cache lock is poisoned")
            .values()
            .filter(|block| block.fork_id() == fork_id)
            .cloned()
            .collect()
    }

    /// Walks parent pointers from `from_root` towards `to_root`.
    ///
    /// Returns `(true, hops)` when `to_root` is reached. The walk gives up
    /// when it would exceed `max_distance`, crosses the finalized boundary,
    /// or a parent is not cached.
    #[must_use]
    pub fn get_canonical_distance(
        &self,
        from_root: H256,
        to_root: H256,
        max_distance: Option<u64>,
        finalized_slot: Slot,
    ) -> (bool, u64) {
        let mut distance = 0;

        let Some(mut block) = self.get_by_root(from_root) else {
            return (false, 0);
        };

        loop {
            if block.root() == to_root {
                return (true, distance);
            }

            if block.slot() <= finalized_slot {
                return (false, distance);
            }

            if let Some(max_distance) = max_distance {
                if distance >= max_distance {
                    return (false, distance);
                }
            }

            let Some(parent_root) = block.parent_root() else {
                return (false, distance);
            };

            let Some(parent) = self.get_by_root(parent_root) else {
                return (false, distance);
            };

            block = parent;
            distance += 1;
        }
    }

    /// First ancestor whose slot falls before the start of `block`'s epoch.
    /// That block anchors the proposer and RANDAO context of the epoch.
    #[must_use]
    pub fn get_dependent_block(
        &self,
        block: &Arc<Block>,
        config: &ChainConfig,
    ) -> Option<Arc<Block>> {
        let epoch_start = config.start_slot_of_epoch(config.epoch_of_slot(block.slot()));
        let mut current = block.clone();

        loop {
            let parent = self.get_by_root(current.parent_root()?)?;

            if parent.slot() < epoch_start {
                return Some(parent);
            }

            current = parent;
        }
    }

    /// Number of cached blocks in `epoch` carrying an execution payload.
    #[must_use]
    pub fn epoch_payload_count(&self, epoch: Epoch, config: &ChainConfig) -> u64 {
        self.blocks
            .read()
            .expect("block cache lock is poisoned")
            .values()
            .filter(|block| config.epoch_of_slot(block.slot()) == epoch)
            .filter(|block| {
                block
                    .body_index()
                    .is_some_and(|index| index.execution_number.is_some())
            })
            .count() as u64
    }

    #[must_use]
    pub fn blocks_below(&self, slot: Slot) -> Vec<Arc<Block>> {
        self.blocks
            .read()
            .expect("block cache lock is poisoned")
            .values()
            .filter(|block| block.slot() < slot)
            .cloned()
            .collect()
    }

    /// Evicts everything below the finalized slot and returns the victims.
    pub fn prune_below(&self, finalized_slot: Slot) -> Vec<Arc<Block>> {
        let mut blocks = self.blocks.write().expect("block cache lock is poisoned");
        let pruned: Vec<Arc<Block>> = blocks
            .values()
            .filter(|block| block.slot() < finalized_slot)
            .cloned()
            .collect();

        for block in &pruned {
            blocks.remove(&block.root());
        }

        pruned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .expect("block cache lock is poisoned")
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use crate::block::tests::signed_header;

    use super::*;

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    /// Inserts a block and links it to its parent via a header.
    fn insert_block(cache: &BlockCache, byte: u8, slot: Slot, parent: u8) -> Arc<Block> {
        let (block, created) = cache.insert_or_get(root(byte), slot);
        assert!(created);
        block.set_header(signed_header(slot, root(parent)));
        block
    }

    #[test]
    fn insert_or_get_constructs_once() {
        let cache = BlockCache::new();

        let (first, created_first) = cache.insert_or_get(root(1), 100);
        let (second, created_second) = cache.insert_or_get(root(1), 100);

        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distance_to_parent_is_one() {
        let cache = BlockCache::new();

        insert_block(&cache, 1, 100, 0);
        let child = insert_block(&cache, 2, 101, 1);

        assert_eq!(
            cache.get_canonical_distance(child.root(), root(1), None, 0),
            (true, 1),
        );
        assert_eq!(
            cache.get_canonical_distance(child.root(), child.root(), None, 0),
            (true, 0),
        );
    }

    #[test]
    fn walk_respects_cap_and_boundary() {
        let cache = BlockCache::new();

        insert_block(&cache, 1, 100, 0);
        insert_block(&cache, 2, 101, 1);
        insert_block(&cache, 3, 102, 2);
        let tip = insert_block(&cache, 4, 103, 3);

        let (reachable, _) = cache.get_canonical_distance(tip.root(), root(1), Some(2), 0);
        assert!(!reachable, "cap of 2 must stop a 3-hop walk");

        let (reachable, distance) = cache.get_canonical_distance(tip.root(), root(1), Some(3), 0);
        assert!(reachable);
        assert_eq!(distance, 3);

        // A finalized boundary above the target makes it unreachable.
        let (reachable, _) = cache.get_canonical_distance(tip.root(), root(1), None, 101);
        assert!(!reachable);
    }

    #[test]
    fn walk_stops_at_unknown_parent() {
        let cache = BlockCache::new();

        // Parent with byte 9 is never inserted.
        let orphan = insert_block(&cache, 2, 101, 9);

        assert_eq!(
            cache.get_canonical_distance(orphan.root(), root(1), None, 0),
            (false, 0),
        );
    }

    #[test]
    fn dependent_block_is_in_preceding_epoch() {
        let config = ChainConfig::minimal();
        let cache = BlockCache::new();

        // Epoch 2 starts at slot 16 with the minimal preset.
        insert_block(&cache, 1, 14, 0);
        insert_block(&cache, 2, 15, 1);
        insert_block(&cache, 3, 16, 2);
        let block = insert_block(&cache, 4, 18, 3);

        let dependent = cache
            .get_dependent_block(&block, &config)
            .expect("dependent block should be cached");

        assert_eq!(dependent.root(), root(2));
        assert_eq!(dependent.slot(), 15);
    }

    #[test]
    fn prune_evicts_only_below_boundary() {
        let cache = BlockCache::new();

        insert_block(&cache, 1, 100, 0);
        insert_block(&cache, 2, 101, 1);
        insert_block(&cache, 3, 102, 2);

        let pruned = cache.prune_below(102);

        assert_eq!(pruned.len(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_by_root(root(3)).is_some());
    }
}
