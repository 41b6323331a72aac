use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::Result;
use log::info;
use store::Store;
use tokio::sync::Mutex as AsyncMutex;
use types::primitives::{ForkId, H256};

use crate::{block::Block, block_cache::BlockCache, chain_state::ChainState, fork::Fork};

pub const DEFAULT_MIN_FORK_DISTANCE: u64 = 3;

/// Tracks fork entities and assigns a fork identity to every block.
///
/// `process_block` runs under a process-wide lock, which makes the assigned
/// identity a function of the observed set of blocks rather than of their
/// arrival order across clients.
pub struct ForkCache {
    chain_state: Arc<ChainState>,
    block_cache: Arc<BlockCache>,
    store: Store,
    min_fork_distance: u64,
    forks: RwLock<HashMap<ForkId, Fork>>,
    fork_id_counter: AtomicU64,
    process_lock: AsyncMutex<()>,
}

impl ForkCache {
    #[must_use]
    pub fn new(
        chain_state: Arc<ChainState>,
        block_cache: Arc<BlockCache>,
        store: Store,
        min_fork_distance: u64,
    ) -> Self {
        Self {
            chain_state,
            block_cache,
            store,
            min_fork_distance,
            forks: RwLock::new(HashMap::new()),
            fork_id_counter: AtomicU64::new(1),
            process_lock: AsyncMutex::new(()),
        }
    }

    /// Reloads fork entities from the store and seeds the id counter with
    /// `max(stored) + 1`.
    pub async fn restore(&self) -> Result<usize> {
        let finalized_slot = self.chain_state.finalized_slot();
        let rows = store::forks::get_unfinalized_forks(&self.store, finalized_slot).await?;
        let highest = store::forks::get_highest_fork_id(&self.store).await?;

        let mut forks = self.forks.write().expect("fork cache lock is poisoned");

        for row in &rows {
            let fork = Fork::from_row(row);
            forks.insert(fork.fork_id, fork);
        }

        self.fork_id_counter
            .store(highest.map_or(1, |id| id + 1), Ordering::Release);

        Ok(rows.len())
    }

    #[must_use]
    pub fn get_by_id(&self, fork_id: ForkId) -> Option<Fork> {
        self.forks
            .read()
            .expect("fork cache lock is poisoned")
            .get(&fork_id)
            .cloned()
    }

    pub fn add(&self, fork: Fork) {
        self.forks
            .write()
            .expect("fork cache lock is poisoned")
            .insert(fork.fork_id, fork);
    }

    #[must_use]
    pub fn fork_count(&self) -> usize {
        self.forks.read().expect("fork cache lock is poisoned").len()
    }

    /// The fork whose leaf is the nearest ancestor of `block`, if any.
    /// Blocks that do not descend from any leaf belong to fork 0.
    #[must_use]
    pub fn get_closest_fork(&self, block: &Arc<Block>) -> Option<Fork> {
        let finalized_slot = self.chain_state.finalized_slot();
        let forks = self.forks.read().expect("fork cache lock is poisoned");

        let mut closest: Option<(Fork, u64)> = None;

        for fork in forks.values() {
            let cap = closest.as_ref().map(|(_, distance)| *distance);

            let (reachable, distance) = self.block_cache.get_canonical_distance(
                block.root(),
                fork.leaf_root,
                cap,
                finalized_slot,
            );

            if !reachable {
                continue;
            }

            if closest
                .as_ref()
                .is_none_or(|(_, best)| distance < *best)
            {
                closest = Some((fork.clone(), distance));
            }
        }

        closest.map(|(fork, _)| fork)
    }

    /// Assigns a fork to `block`, splitting the parent fork in two when the
    /// block reveals a divergence of at least `min_fork_distance` on both
    /// sides. Returns the fork id the block ended up with.
    pub async fn process_block(&self, block: &Arc<Block>) -> Result<ForkId> {
        let _guard = self.process_lock.lock().await;

        let parent_fork_id = self
            .get_closest_fork(block)
            .map_or(0, |fork| fork.fork_id);

        let mut fork_blocks = self.block_cache.get_fork_blocks(parent_fork_id);
        fork_blocks.sort_by(|a, b| b.slot().cmp(&a.slot()));

        let mut seen = HashSet::new();
        let mut result = parent_fork_id;

        for other in &fork_blocks {
            if seen.contains(&other.root()) {
                continue;
            }

            let Some((base, distance_new, distance_other)) =
                self.check_fork_distance(block, other, &mut seen)
            else {
                continue;
            };

            if distance_new < self.min_fork_distance || distance_other < self.min_fork_distance {
                continue;
            }

            let fork1 = Fork::new(self.next_fork_id(), &base, block, parent_fork_id);
            self.add(fork1.clone());
            let fork1_roots = self.update_new_fork_blocks(&fork1, &fork_blocks);

            let fork2 = Fork::new(self.next_fork_id(), &base, other, parent_fork_id);
            self.add(fork2.clone());
            let fork2_roots = self.update_new_fork_blocks(&fork2, &fork_blocks);

            info!(
                "new fork detected (base {} [{:?}], head1 {} [{:?}], head2 {} [{:?}])",
                base.slot(),
                base.root(),
                block.slot(),
                block.root(),
                other.slot(),
                other.root(),
            );

            // Both fork rows and both relabel sets must land atomically;
            // a partial write would leave blocks pointing at unknown forks.
            let fork1_row = fork1.to_row();
            let fork2_row = fork2.to_row();

            self.store
                .run_transaction(move |tx| {
                    store::forks::insert_fork(tx, &fork1_row)?;
                    store::unfinalized_blocks::update_unfinalized_block_fork_ids(
                        tx,
                        &fork1_roots,
                        fork1_row.fork_id,
                    )?;
                    store::forks::insert_fork(tx, &fork2_row)?;
                    store::unfinalized_blocks::update_unfinalized_block_fork_ids(
                        tx,
                        &fork2_roots,
                        fork2_row.fork_id,
                    )?;
                    Ok(())
                })
                .await?;

            result = fork1.fork_id;
            break;
        }

        block.set_fork_id(result);

        Ok(result)
    }

    /// Evicts fork entities whose base fell below the finalized boundary.
    pub fn prune_finalized(&self, finalized_slot: u64) -> usize {
        let mut forks = self.forks.write().expect("fork cache lock is poisoned");
        let before = forks.len();

        forks.retain(|_, fork| fork.base_slot >= finalized_slot);

        before - forks.len()
    }

    /// Walks both blocks down to their common ancestor, stepping whichever
    /// currently has the higher slot (both on ties). Every visited root goes
    /// into `seen`, letting the caller skip ancestors on later probes.
    ///
    /// Returns the ancestor and the hops each endpoint is away from it, or
    /// `None` when the walk hits the finalized boundary or an uncached
    /// parent first.
    fn check_fork_distance(
        &self,
        block1: &Arc<Block>,
        block2: &Arc<Block>,
        seen: &mut HashSet<H256>,
    ) -> Option<(Arc<Block>, u64, u64)> {
        let finalized_slot = self.chain_state.finalized_slot();

        let mut current1 = block1.clone();
        let mut current2 = block2.clone();
        let mut distance1 = 0;
        let mut distance2 = 0;

        loop {
            seen.insert(current1.root());
            seen.insert(current2.root());

            if current1.root() == current2.root() {
                return Some((current1, distance1, distance2));
            }

            if current1.slot() <= finalized_slot || current2.slot() <= finalized_slot {
                return None;
            }

            if current1.slot() <= current2.slot() {
                let parent_root = current2.parent_root()?;
                current2 = self.block_cache.get_by_root(parent_root)?;
                distance2 += 1;
            }

            if current2.slot() <= current1.slot() {
                let parent_root = current1.parent_root()?;
                current1 = self.block_cache.get_by_root(parent_root)?;
                distance1 += 1;
            }
        }
    }

    /// Relabels every member of the parent fork that sits strictly above the
    /// base and is reachable from the new leaf. Returns the affected roots.
    fn update_new_fork_blocks(&self, fork: &Fork, blocks: &[Arc<Block>]) -> Vec<Vec<u8>> {
        let finalized_slot = self.chain_state.finalized_slot();
        let mut updated_roots = vec![];

        for block in blocks {
            if block.slot() <= fork.base_slot {
                continue;
            }

            let (is_in_fork, _) = self.block_cache.get_canonical_distance(
                fork.leaf_root,
                block.root(),
                None,
                finalized_slot,
            );

            if !is_in_fork {
                continue;
            }

            block.set_fork_id(fork.fork_id);
            updated_roots.push(block.root().as_bytes().to_vec());
        }

        updated_roots
    }

    fn next_fork_id(&self) -> ForkId {
        self.fork_id_counter.fetch_add(1, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use store::schema;

    use crate::block::tests::signed_header;

    use super::*;

    struct Fixture {
        chain_state: Arc<ChainState>,
        block_cache: Arc<BlockCache>,
        fork_cache: ForkCache,
        store: Store,
    }

    async fn fixture() -> Result<Fixture> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let chain_state = Arc::new(ChainState::new(Arc::new(
            types::config::ChainConfig::minimal(),
        )));
        let block_cache = Arc::new(BlockCache::new());
        let fork_cache = ForkCache::new(
            chain_state.clone(),
            block_cache.clone(),
            store.clone(),
            DEFAULT_MIN_FORK_DISTANCE,
        );

        Ok(Fixture {
            chain_state,
            block_cache,
            fork_cache,
            store,
        })
    }

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn insert_block(fixture: &Fixture, byte: u8, slot: u64, parent: u8) -> Arc<Block> {
        let (block, _) = fixture.block_cache.insert_or_get(root(byte), slot);
        block.set_header(signed_header(slot, root(parent)));
        block
    }

    #[tokio::test]
    async fn linear_chain_stays_on_fork_zero() -> Result<()> {
        let fixture = fixture().await?;

        let blocks = [
            insert_block(&fixture, 1, 100, 0),
            insert_block(&fixture, 2, 101, 1),
            insert_block(&fixture, 3, 102, 2),
        ];

        for block in &blocks {
            assert_eq!(fixture.fork_cache.process_block(block).await?, 0);
        }

        for block in &blocks {
            assert_eq!(block.fork_id(), 0);
        }

        assert_eq!(fixture.fork_cache.fork_count(), 0);
        assert!(store::forks::get_unfinalized_forks(&fixture.store, 0)
            .await?
            .is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn sub_threshold_reorg_creates_no_fork() -> Result<()> {
        let fixture = fixture().await?;

        let parent = insert_block(&fixture, 1, 100, 0);
        let child = insert_block(&fixture, 2, 101, 1);
        // Sibling of `child` with the same parent.
        let sibling = insert_block(&fixture, 3, 101, 1);

        fixture.fork_cache.process_block(&parent).await?;
        fixture.fork_cache.process_block(&child).await?;
        fixture.fork_cache.process_block(&sibling).await?;

        assert_eq!(child.fork_id(), 0);
        assert_eq!(sibling.fork_id(), 0);
        assert_eq!(fixture.fork_cache.fork_count(), 0);

        Ok(())
    }

    /// Builds the two-branch scenario: a linear chain A..E and a second
    /// branch from B. Processing blocks in arrival order must split into two
    /// forks at E', with every block above B relabeled to its side.
    #[tokio::test]
    async fn detectable_split_creates_two_forks() -> Result<()> {
        let fixture = fixture().await?;

        let a = insert_block(&fixture, 0xa, 100, 0);
        let b = insert_block(&fixture, 0xb, 101, 0xa);
        let c = insert_block(&fixture, 0xc, 102, 0xb);
        let d = insert_block(&fixture, 0xd, 103, 0xc);
        let e = insert_block(&fixture, 0xe, 104, 0xd);

        for block in [&a, &b, &c, &d, &e] {
            fixture.fork_cache.process_block(block).await?;
        }

        let c2 = insert_block(&fixture, 0x1c, 102, 0xb);
        let d2 = insert_block(&fixture, 0x1d, 103, 0x1c);
        let e2 = insert_block(&fixture, 0x1e, 104, 0x1d);

        fixture.fork_cache.process_block(&c2).await?;
        fixture.fork_cache.process_block(&d2).await?;
        assert_eq!(fixture.fork_cache.fork_count(), 0, "depth 2 is below the threshold");

        let new_fork_id = fixture.fork_cache.process_block(&e2).await?;

        assert_eq!(fixture.fork_cache.fork_count(), 2);

        let fork1 = fixture
            .fork_cache
            .get_by_id(new_fork_id)
            .expect("new block's fork should exist");
        let fork2 = fixture
            .fork_cache
            .get_by_id(new_fork_id + 1)
            .expect("sibling fork should exist");

        // Both forks share the base and split at distinct leaves.
        assert_eq!(fork1.base_root, b.root());
        assert_eq!(fork2.base_root, b.root());
        assert_ne!(fork1.leaf_root, fork2.leaf_root);
        assert_eq!(fork1.leaf_root, e2.root());
        assert_eq!(fork2.leaf_root, e.root());
        assert_eq!(fork1.parent_fork, 0);
        assert_eq!(fork2.parent_fork, 0);

        // Each branch is relabeled to its side; the trunk stays on fork 0.
        for block in [&c2, &d2, &e2] {
            assert_eq!(block.fork_id(), fork1.fork_id);
        }

        for block in [&c, &d, &e] {
            assert_eq!(block.fork_id(), fork2.fork_id);
        }

        assert_eq!(a.fork_id(), 0);
        assert_eq!(b.fork_id(), 0);

        assert_eq!(e2.fork_id(), new_fork_id);
        assert!(fixture
            .block_cache
            .get_fork_blocks(new_fork_id)
            .iter()
            .any(|cached| cached.root() == e2.root()));

        // Both fork rows were committed in the same transaction.
        let rows = store::forks::get_unfinalized_forks(&fixture.store, 0).await?;
        assert_eq!(rows.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn process_block_is_idempotent() -> Result<()> {
        let fixture = fixture().await?;

        let a = insert_block(&fixture, 0xa, 100, 0);
        let b = insert_block(&fixture, 0xb, 101, 0xa);
        let c = insert_block(&fixture, 0xc, 102, 0xb);
        let d = insert_block(&fixture, 0xd, 103, 0xc);
        let e = insert_block(&fixture, 0xe, 104, 0xd);
        let c2 = insert_block(&fixture, 0x1c, 102, 0xb);
        let d2 = insert_block(&fixture, 0x1d, 103, 0x1c);
        let e2 = insert_block(&fixture, 0x1e, 104, 0x1d);

        for block in [&a, &b, &c, &d, &e, &c2, &d2] {
            fixture.fork_cache.process_block(block).await?;
        }

        let first = fixture.fork_cache.process_block(&e2).await?;
        let fork_ids: Vec<_> = [&a, &b, &c, &d, &e, &c2, &d2, &e2]
            .iter()
            .map(|block| block.fork_id())
            .collect();

        let second = fixture.fork_cache.process_block(&e2).await?;

        assert_eq!(first, second);
        assert_eq!(fixture.fork_cache.fork_count(), 2);
        assert_eq!(
            fork_ids,
            [&a, &b, &c, &d, &e, &c2, &d2, &e2]
                .iter()
                .map(|block| block.fork_id())
                .collect::<Vec<_>>(),
        );

        Ok(())
    }

    #[tokio::test]
    async fn blocks_extending_a_fork_leaf_join_that_fork() -> Result<()> {
        let fixture = fixture().await?;

        let a = insert_block(&fixture, 0xa, 100, 0);
        let b = insert_block(&fixture, 0xb, 101, 0xa);
        let c = insert_block(&fixture, 0xc, 102, 0xb);
        let d = insert_block(&fixture, 0xd, 103, 0xc);
        let e = insert_block(&fixture, 0xe, 104, 0xd);
        let c2 = insert_block(&fixture, 0x1c, 102, 0xb);
        let d2 = insert_block(&fixture, 0x1d, 103, 0x1c);
        let e2 = insert_block(&fixture, 0x1e, 104, 0x1d);

        for block in [&a, &b, &c, &d, &e, &c2, &d2] {
            fixture.fork_cache.process_block(block).await?;
        }

        let fork1_id = fixture.fork_cache.process_block(&e2).await?;

        // A child of the new leaf lands on the same fork without a split.
        let f2 = insert_block(&fixture, 0x1f, 105, 0x1e);
        assert_eq!(fixture.fork_cache.process_block(&f2).await?, fork1_id);
        assert_eq!(f2.fork_id(), fork1_id);
        assert_eq!(fixture.fork_cache.fork_count(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn restore_seeds_fork_id_counter() -> Result<()> {
        let fixture = fixture().await?;

        let stored = store::rows::ForkRow {
            fork_id: 5,
            base_slot: 101,
            base_root: vec![0xb; 32],
            leaf_slot: 104,
            leaf_root: vec![0xe; 32],
            parent_fork: 0,
        };

        fixture
            .store
            .run_transaction(move |tx| store::forks::insert_fork(tx, &stored))
            .await?;

        assert_eq!(fixture.fork_cache.restore().await?, 1);
        assert_eq!(fixture.fork_cache.fork_count(), 1);
        assert!(fixture.fork_cache.get_by_id(5).is_some());
        assert_eq!(fixture.fork_cache.next_fork_id(), 6);

        Ok(())
    }

    #[tokio::test]
    async fn fork_base_stays_above_finalized_boundary() -> Result<()> {
        let fixture = fixture().await?;

        // Finalize epoch 12 (slot 96 with the minimal preset) so the walks
        // have a real boundary below the chain under test.
        fixture
            .chain_state
            .set_finalized_checkpoint(12, root(0x99));

        let a = insert_block(&fixture, 0xa, 100, 0);
        let b = insert_block(&fixture, 0xb, 101, 0xa);
        let c = insert_block(&fixture, 0xc, 102, 0xb);
        let d = insert_block(&fixture, 0xd, 103, 0xc);
        let e = insert_block(&fixture, 0xe, 104, 0xd);
        let c2 = insert_block(&fixture, 0x1c, 102, 0xb);
        let d2 = insert_block(&fixture, 0x1d, 103, 0x1c);
        let e2 = insert_block(&fixture, 0x1e, 104, 0x1d);

        for block in [&a, &b, &c, &d, &e, &c2, &d2] {
            fixture.fork_cache.process_block(block).await?;
        }

        fixture.fork_cache.process_block(&e2).await?;

        for row in store::forks::get_unfinalized_forks(&fixture.store, 0).await? {
            assert!(row.base_slot > fixture.chain_state.finalized_slot());
        }

        Ok(())
    }
}
