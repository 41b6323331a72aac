//! Core of the explorer's indexing subsystem: the fork-aware cache of
//! unfinalized beacon blocks, the per-client ingestors feeding it, the
//! finalization driver writing it out, and the deposit-log crawler.

use std::sync::Arc;

use anyhow::Result;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{info, warn};
use types::{
    codec,
    config::ChainConfig,
    primitives::{Epoch, H256},
};

pub mod block;
pub mod block_cache;
pub mod chain_state;
pub mod client;
pub mod deposit_indexer;
pub mod finalization;
pub mod fork;
pub mod fork_cache;

use block_cache::BlockCache;
use chain_state::ChainState;
use finalization::FinalizedCheckpoint;
use fork_cache::ForkCache;
use store::Store;

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    /// Minimum block distance on both sides of a divergence before it is
    /// promoted to a pair of fork entities. Short-lived reorgs of a slot or
    /// two stay on their parent fork.
    pub min_fork_distance: u64,
    pub deposit_log_batch_size: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            min_fork_distance: fork_cache::DEFAULT_MIN_FORK_DISTANCE,
            deposit_log_batch_size: deposit_indexer::DEFAULT_DEPOSIT_LOG_BATCH_SIZE,
        }
    }
}

/// Shared state of the indexing subsystem.
pub struct Indexer {
    pub chain_state: Arc<ChainState>,
    pub block_cache: Arc<BlockCache>,
    pub fork_cache: Arc<ForkCache>,
    pub store: Store,
    finalization_tx: UnboundedSender<FinalizedCheckpoint>,
}

impl Indexer {
    /// Builds the indexer and hands back the finalization checkpoint
    /// receiver for the driver.
    #[must_use]
    pub fn new(
        config: &IndexerConfig,
        chain_config: Arc<ChainConfig>,
        store: Store,
    ) -> (Arc<Self>, UnboundedReceiver<FinalizedCheckpoint>) {
        let chain_state = Arc::new(ChainState::new(chain_config));
        let block_cache = Arc::new(BlockCache::new());
        let fork_cache = Arc::new(ForkCache::new(
            chain_state.clone(),
            block_cache.clone(),
            store.clone(),
            config.min_fork_distance,
        ));

        let (finalization_tx, finalization_rx) = unbounded();

        let indexer = Arc::new(Self {
            chain_state,
            block_cache,
            fork_cache,
            store,
            finalization_tx,
        });

        (indexer, finalization_rx)
    }

    /// Hands a finalization checkpoint to the driver. Idempotent; stale
    /// checkpoints are dropped by the driver itself.
    pub fn submit_finalized_checkpoint(&self, epoch: Epoch, root: H256) {
        let _ = self.finalization_tx.unbounded_send((epoch, root));
    }

    /// Rebuilds the caches from the unfinalized tables. Called once at
    /// startup after the finalized checkpoint is known.
    pub async fn restore_unfinalized(&self) -> Result<()> {
        let restored_forks = self.fork_cache.restore().await?;

        let finalized_slot = self.chain_state.finalized_slot();
        let rows = store::unfinalized_blocks::get_unfinalized_blocks(&self.store).await?;

        let mut restored_blocks = 0_usize;

        for row in rows {
            if row.slot < finalized_slot {
                continue;
            }

            let root = H256::from_slice(&row.root);
            let (block, created) = self.block_cache.insert_or_get(root, row.slot);

            if !created {
                continue;
            }

            match codec::decode_signed_header(&row.header_ssz) {
                Ok(header) => {
                    block.set_header(header);
                }
                Err(error) => {
                    warn!("stored header of {root:?} is unreadable: {error}");
                    continue;
                }
            }

            match codec::unmarshal_versioned_signed_block(row.block_ver, &row.block_ssz) {
                Ok(body) => {
                    block.set_body(Arc::new(body));
                }
                Err(error) => {
                    warn!("stored body of {root:?} is unreadable: {error}");
                }
            }

            block.set_fork_id(row.fork_id);
            block.set_status(row.status);
            block.set_in_unfinalized_store(true);

            restored_blocks += 1;
        }

        info!(
            "restored {restored_blocks} unfinalized blocks and {restored_forks} forks \
             above slot {finalized_slot}",
        );

        Ok(())
    }
}
