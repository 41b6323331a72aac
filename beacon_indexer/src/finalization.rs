use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use futures::{channel::mpsc::UnboundedReceiver, StreamExt as _};
use itertools::Itertools as _;
use log::{info, warn};
use store::rows::{
    ConsolidationRow, DepositRow, EpochRow, SlashingReason, SlashingRow, SlotRow, SlotStatus,
    UnfinalizedBlockStatus, VoluntaryExitRow,
};
use tokio::sync::Mutex as AsyncMutex;
use types::primitives::{DepositIndex, Epoch, H256};

use crate::{block::Block, Indexer};

pub type FinalizedCheckpoint = (Epoch, H256);

/// Promotes blocks from the unfinalized table into the finalized tables
/// whenever a new checkpoint arrives.
///
/// Checkpoint-level failures are logged and dropped; the next checkpoint
/// repeats all outstanding work because the walk always ends at the
/// previously finalized head.
pub struct FinalizationDriver {
    indexer: Arc<Indexer>,
    checkpoints: AsyncMutex<UnboundedReceiver<FinalizedCheckpoint>>,
}

impl FinalizationDriver {
    #[must_use]
    pub fn new(indexer: Arc<Indexer>, checkpoints: UnboundedReceiver<FinalizedCheckpoint>) -> Self {
        Self {
            indexer,
            checkpoints: AsyncMutex::new(checkpoints),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock().await;

        while let Some((epoch, root)) = checkpoints.next().await {
            if let Err(error) = process_finalization(&self.indexer, epoch, root).await {
                warn!("finalization of epoch {epoch} failed: {error:?}");
            }
        }

        Ok(())
    }
}

/// Runs one finalization round. Idempotent per epoch; all store writes of a
/// round commit in a single transaction.
pub async fn process_finalization(indexer: &Arc<Indexer>, epoch: Epoch, root: H256) -> Result<()> {
    let previous = indexer.chain_state.finalized_checkpoint();

    if epoch <= previous.epoch {
        return Ok(());
    }

    let finalized_slot = indexer.chain_state.start_slot_of_epoch(epoch);
    let previous_slot = indexer.chain_state.finalized_slot();

    let (canonical, anchor_slot) = canonical_chain(indexer, root, previous.root, previous_slot)?;

    let canonical_roots: HashSet<H256> = canonical.iter().map(|block| block.root()).collect();

    let orphaned: Vec<Arc<Block>> = indexer
        .block_cache
        .blocks_below(finalized_slot)
        .into_iter()
        .filter(|block| !canonical_roots.contains(&block.root()))
        .filter(|block| block.root() != previous.root && !block.is_in_finalized_store())
        .collect();

    let mut deposit_index = store::deposits::get_max_deposit_index(&indexer.store)
        .await?
        .map_or(0, |index| index + 1);

    let mut slot_rows = vec![];
    let mut orphaned_rows = vec![];
    let mut deposit_rows = vec![];
    let mut exit_rows = vec![];
    let mut slashing_rows = vec![];
    let mut consolidation_rows = vec![];
    let mut epoch_totals = BTreeMap::<Epoch, EpochRow>::new();

    for block in &canonical {
        slot_rows.push(build_slot_row(block, SlotStatus::Canonical)?);

        collect_block_operations(
            block,
            false,
            Some(&mut deposit_index),
            &mut deposit_rows,
            &mut exit_rows,
            &mut slashing_rows,
            &mut consolidation_rows,
        );

        let block_epoch = indexer.chain_state.epoch_of_slot(block.slot());
        let totals = epoch_totals.entry(block_epoch).or_insert(EpochRow {
            epoch: block_epoch,
            block_count: 0,
            payload_count: 0,
        });

        totals.block_count += 1;

        if block
            .body_index()
            .is_some_and(|index| index.execution_number.is_some())
        {
            totals.payload_count += 1;
        }
    }

    // Slots the canonical chain skipped get an explicit missed row.
    let canonical_slots = canonical
        .iter()
        .map(|block| block.slot())
        .collect::<Vec<_>>();

    for (lower, upper) in core::iter::once(anchor_slot)
        .chain(canonical_slots.iter().copied())
        .chain(core::iter::once(finalized_slot))
        .tuple_windows()
    {
        for missed in lower + 1..upper {
            slot_rows.push(missed_slot_row(missed));
        }
    }

    for block in &orphaned {
        match block.to_orphaned_row(true) {
            Ok(row) => orphaned_rows.push(row),
            Err(error) => {
                warn!(
                    "cannot preserve orphaned block {:?}: {error}",
                    block.root(),
                );
                continue;
            }
        }

        match build_slot_row(block, SlotStatus::Orphaned) {
            Ok(row) => slot_rows.push(row),
            Err(error) => {
                warn!("cannot build slot row for {:?}: {error}", block.root());
                continue;
            }
        }

        collect_block_operations(
            block,
            true,
            None,
            &mut deposit_rows,
            &mut exit_rows,
            &mut slashing_rows,
            &mut consolidation_rows,
        );
    }

    let epoch_rows: Vec<EpochRow> = epoch_totals.into_values().collect();

    // Canonical blocks at the boundary slot keep their unfinalized row as
    // the anchor for the next round; only their status changes.
    let surviving_roots: Vec<Vec<u8>> = canonical
        .iter()
        .filter(|block| block.slot() >= finalized_slot)
        .map(|block| block.root().as_bytes().to_vec())
        .collect();

    indexer
        .store
        .run_transaction(move |tx| {
            for row in &slot_rows {
                store::slots::insert_slot(tx, row)?;
            }

            for row in &orphaned_rows {
                store::orphaned_blocks::insert_orphaned_block(tx, row)?;
            }

            store::deposits::insert_deposits(tx, &deposit_rows)?;
            store::voluntary_exits::insert_voluntary_exits(tx, &exit_rows)?;
            store::slashings::insert_slashings(tx, &slashing_rows)?;
            store::consolidations::insert_consolidations(tx, &consolidation_rows)?;

            for row in &epoch_rows {
                store::epochs::upsert_epoch(tx, row)?;
            }

            store::unfinalized_blocks::delete_unfinalized_blocks_before(tx, finalized_slot)?;
            store::epochs::delete_unfinalized_epochs_before(tx, epoch)?;
            store::forks::delete_unfinalized_forks(tx, finalized_slot)?;

            for root in &surviving_roots {
                store::unfinalized_blocks::update_unfinalized_block_status(
                    tx,
                    root,
                    UnfinalizedBlockStatus::Imported,
                )?;
            }

            Ok(())
        })
        .await?;

    for block in &canonical {
        block.set_in_finalized_store(true);
        block.set_in_unfinalized_store(false);
        block.set_status(UnfinalizedBlockStatus::Imported);
    }

    for block in &orphaned {
        block.set_in_unfinalized_store(false);
    }

    indexer.chain_state.set_finalized_checkpoint(epoch, root);

    let pruned = indexer.block_cache.prune_below(finalized_slot);
    let pruned_forks = indexer.fork_cache.prune_finalized(finalized_slot);

    info!(
        "finalized epoch {epoch} at {root:?}: {} canonical, {} orphaned, \
         {} cache entries and {pruned_forks} forks pruned",
        canonical.len(),
        orphaned.len(),
        pruned.len(),
    );

    Ok(())
}

/// Walks parent pointers from the finalized head down to the previously
/// finalized head. Returns the chain in ascending slot order together with
/// the slot of the block the walk stopped at.
fn canonical_chain(
    indexer: &Arc<Indexer>,
    head_root: H256,
    previous_root: H256,
    previous_slot: u64,
) -> Result<(Vec<Arc<Block>>, u64)> {
    let head = indexer
        .block_cache
        .get_by_root(head_root)
        .ok_or_else(|| anyhow!("finalized block {head_root:?} is not cached"))?;

    let mut canonical = vec![];
    let mut current = head;

    loop {
        if current.root() == previous_root || current.slot() <= previous_slot {
            break;
        }

        canonical.push(current.clone());

        let Some(parent_root) = current.parent_root() else {
            bail!("header of {:?} has not arrived yet", current.root());
        };

        let Some(parent) = indexer.block_cache.get_by_root(parent_root) else {
            bail!(
                "canonical chain is incomplete: {parent_root:?} at or above slot {} is not cached",
                previous_slot,
            );
        };

        current = parent;
    }

    let anchor_slot = current.slot().max(previous_slot);

    canonical.reverse();

    Ok((canonical, anchor_slot))
}

fn build_slot_row(block: &Arc<Block>, status: SlotStatus) -> Result<SlotRow> {
    let header = block
        .header()
        .ok_or_else(|| anyhow!("header of {:?} has not arrived yet", block.root()))?;
    let index = block.body_index();

    Ok(SlotRow {
        slot: block.slot(),
        root: block.root().as_bytes().to_vec(),
        status,
        proposer: Some(header.message.proposer_index),
        parent_root: Some(header.message.parent_root.as_bytes().to_vec()),
        state_root: Some(header.message.state_root.as_bytes().to_vec()),
        graffiti: index
            .as_ref()
            .map(|index| index.graffiti.as_bytes().to_vec()),
        eth_block_number: index.as_ref().and_then(|index| index.execution_number),
        eth_block_hash: index
            .as_ref()
            .and_then(|index| index.execution_hash)
            .map(|hash| hash.as_bytes().to_vec()),
        eth_block_extra: index.and_then(|index| index.execution_extra_data),
        fork_id: block.fork_id(),
        has_payload: block
            .body_index()
            .is_some_and(|index| index.execution_number.is_some()),
    })
}

fn missed_slot_row(slot: u64) -> SlotRow {
    SlotRow {
        slot,
        root: H256::zero().as_bytes().to_vec(),
        status: SlotStatus::Missed,
        proposer: None,
        parent_root: None,
        state_root: None,
        graffiti: None,
        eth_block_number: None,
        eth_block_hash: None,
        eth_block_extra: None,
        fork_id: 0,
        has_payload: false,
    }
}

/// Builds the operation rows contained in one block. Canonical blocks
/// consume monotonically increasing deposit indices; orphaned deposits get
/// none.
fn collect_block_operations(
    block: &Arc<Block>,
    orphaned: bool,
    mut deposit_index: Option<&mut DepositIndex>,
    deposit_rows: &mut Vec<DepositRow>,
    exit_rows: &mut Vec<VoluntaryExitRow>,
    slashing_rows: &mut Vec<SlashingRow>,
    consolidation_rows: &mut Vec<ConsolidationRow>,
) {
    let Some(body) = block.body() else {
        return;
    };

    let slot_number = block.slot();
    let slot_root = block.root().as_bytes().to_vec();
    let proposer = body.message().proposer_index;
    let operations = body.body();

    for (slot_index, deposit) in operations.deposits.iter().enumerate() {
        let index = deposit_index.as_deref_mut().map(|next| {
            let assigned = *next;
            *next += 1;
            assigned
        });

        deposit_rows.push(DepositRow {
            deposit_index: index,
            slot_number,
            slot_index: slot_index as u64,
            slot_root: slot_root.clone(),
            orphaned,
            publickey: deposit.data.pubkey.as_bytes().to_vec(),
            withdrawal_credentials: deposit.data.withdrawal_credentials.as_bytes().to_vec(),
            amount: deposit.data.amount,
        });
    }

    for (slot_index, voluntary_exit) in operations.voluntary_exits.iter().enumerate() {
        exit_rows.push(VoluntaryExitRow {
            slot_number,
            slot_index: slot_index as u64,
            slot_root: slot_root.clone(),
            orphaned,
            validator: voluntary_exit.message.validator_index,
        });
    }

    let mut slashing_index = 0;

    for proposer_slashing in &operations.proposer_slashings {
        slashing_rows.push(SlashingRow {
            slot_number,
            slot_index: slashing_index,
            slot_root: slot_root.clone(),
            orphaned,
            validator: proposer_slashing.signed_header_1.message.proposer_index,
            slasher: proposer,
            reason: SlashingReason::ProposerSlashing,
        });

        slashing_index += 1;
    }

    for attester_slashing in &operations.attester_slashings {
        let first: HashSet<u64> = attester_slashing
            .attestation_1
            .attesting_indices
            .iter()
            .copied()
            .collect();

        for validator in attester_slashing
            .attestation_2
            .attesting_indices
            .iter()
            .filter(|validator| first.contains(validator))
        {
            slashing_rows.push(SlashingRow {
                slot_number,
                slot_index: slashing_index,
                slot_root: slot_root.clone(),
                orphaned,
                validator: *validator,
                slasher: proposer,
                reason: SlashingReason::AttesterSlashing,
            });
        }

        slashing_index += 1;
    }

    for (slot_index, consolidation) in operations.consolidations.iter().enumerate() {
        consolidation_rows.push(ConsolidationRow {
            slot_number,
            slot_index: slot_index as u64,
            slot_root: slot_root.clone(),
            orphaned,
            source_index: consolidation.source_index,
            target_index: consolidation.target_index,
            epoch: consolidation.epoch,
        });
    }
}

#[cfg(test)]
mod tests {
    use store::schema;
    use types::{
        config::ChainConfig,
        containers::{
            BeaconBlock, BlockBody, BlockVersion, Consolidation, Deposit, DepositData,
            ExecutionPayloadMeta, SignedBeaconBlock, SignedVoluntaryExit, VersionedSignedBlock,
            VoluntaryExit,
        },
        primitives::{PublicKeyBytes, SignatureBytes, Slot},
    };

    use crate::block::tests::signed_header;

    use super::*;

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn body_with_operations(
        slot: Slot,
        execution_number: Option<u64>,
        deposits: usize,
        proposer_slashings: usize,
        voluntary_exits: usize,
        consolidations: usize,
    ) -> VersionedSignedBlock {
        VersionedSignedBlock {
            version: BlockVersion::Electra,
            data: SignedBeaconBlock {
                message: BeaconBlock {
                    slot,
                    proposer_index: 1,
                    parent_root: H256::zero(),
                    state_root: H256::repeat_byte(0xee),
                    body: BlockBody {
                        graffiti: H256::repeat_byte(0x67),
                        proposer_slashings: (0..proposer_slashings)
                            .map(|_| types::containers::ProposerSlashing {
                                signed_header_1: signed_header(slot, H256::repeat_byte(0x51)),
                                signed_header_2: signed_header(slot, H256::repeat_byte(0x52)),
                            })
                            .collect(),
                        attester_slashings: vec![],
                        deposits: (0..deposits)
                            .map(|_| Deposit {
                                data: DepositData {
                                    pubkey: PublicKeyBytes::repeat_byte(0xaa),
                                    withdrawal_credentials: H256::repeat_byte(0xbb),
                                    amount: 32_000_000_000,
                                    signature: SignatureBytes::repeat_byte(0xcc),
                                },
                            })
                            .collect(),
                        voluntary_exits: (0..voluntary_exits)
                            .map(|index| SignedVoluntaryExit {
                                message: VoluntaryExit {
                                    epoch: 12,
                                    validator_index: 1000 + index as u64,
                                },
                                signature: SignatureBytes::zero(),
                            })
                            .collect(),
                        consolidations: (0..consolidations)
                            .map(|index| Consolidation {
                                source_index: 2000 + index as u64,
                                target_index: 3000 + index as u64,
                                epoch: 12,
                            })
                            .collect(),
                        execution_payload: execution_number.map(|block_number| {
                            ExecutionPayloadMeta {
                                block_hash: H256::repeat_byte(0x88),
                                block_number,
                                timestamp: 1_700_000_000,
                                extra_data: vec![],
                            }
                        }),
                    },
                },
                signature: SignatureBytes::zero(),
            },
        }
    }

    struct Fixture {
        indexer: Arc<Indexer>,
    }

    async fn fixture() -> Result<Fixture> {
        let store = store::Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let (indexer, _finalization_rx) = Indexer::new(
            &crate::IndexerConfig::default(),
            Arc::new(ChainConfig::minimal()),
            store,
        );

        Ok(Fixture { indexer })
    }

    /// Inserts a block with a header, a body, and its unfinalized store row.
    async fn insert_full_block(
        fixture: &Fixture,
        byte: u8,
        slot: Slot,
        parent: u8,
        deposits: usize,
        proposer_slashings: usize,
    ) -> Result<Arc<Block>> {
        let (block, _) = fixture.indexer.block_cache.insert_or_get(root(byte), slot);
        block.set_header(signed_header(slot, root(parent)));
        block.set_body(Arc::new(body_with_operations(
            slot,
            Some(17_000_000 + slot),
            deposits,
            proposer_slashings,
            1,
            1,
        )));

        let row = block.to_unfinalized_row(true)?;
        fixture
            .indexer
            .store
            .run_transaction(move |tx| store::unfinalized_blocks::insert_unfinalized_block(tx, &row))
            .await?;
        block.set_in_unfinalized_store(true);

        Ok(block)
    }

    /// Deep reorg followed by finalization on one side: the canonical chain
    /// moves to the slot tables, the losing branch moves to the orphan
    /// table, and everything below the boundary is flushed from the
    /// unfinalized tables, the fork table and the cache.
    #[tokio::test]
    async fn finalization_promotes_canonical_and_orphans_rest() -> Result<()> {
        let fixture = fixture().await?;
        let indexer = &fixture.indexer;

        // The previously finalized head anchors the canonical walk.
        indexer.chain_state.set_finalized_checkpoint(12, root(0xa));

        let a = insert_full_block(&fixture, 0xa, 100, 0, 0, 0).await?;
        let b = insert_full_block(&fixture, 0xb, 101, 0xa, 0, 0).await?;
        let c = insert_full_block(&fixture, 0xc, 102, 0xb, 0, 0).await?;
        let d = insert_full_block(&fixture, 0xd, 103, 0xc, 2, 1).await?;
        let e = insert_full_block(&fixture, 0xe, 104, 0xd, 0, 0).await?;
        let c2 = insert_full_block(&fixture, 0x1c, 102, 0xb, 0, 0).await?;
        let d2 = insert_full_block(&fixture, 0x1d, 103, 0x1c, 0, 0).await?;
        let e2 = insert_full_block(&fixture, 0x1e, 104, 0x1d, 0, 0).await?;

        for block in [&a, &b, &c, &d, &e, &c2, &d2, &e2] {
            indexer.fork_cache.process_block(block).await?;
        }

        assert_eq!(indexer.fork_cache.fork_count(), 2);

        // Finalize epoch 13 (slot 104 with the minimal preset) on the E side.
        process_finalization(indexer, 13, root(0xe)).await?;

        assert_eq!(indexer.chain_state.finalized_epoch(), 13);
        assert_eq!(indexer.chain_state.finalized_slot(), 104);

        // B..E moved to the slot tables, C'/D' to the orphan table.
        for block in [&b, &c, &d, &e] {
            assert!(block.is_in_finalized_store());
            assert!(!block.is_in_unfinalized_store());
            assert_eq!(block.status(), store::rows::UnfinalizedBlockStatus::Imported);
        }

        for orphan in [&c2, &d2] {
            let row = store::orphaned_blocks::get_orphaned_block(
                &indexer.store,
                orphan.root().as_bytes(),
            )
            .await?
            .expect("orphaned block should be preserved");

            assert!(!row.block_ssz.is_empty(), "orphan bodies must be preserved");
        }

        // Unfinalized rows and forks below the boundary are gone; the two
        // tip blocks at the boundary slot survive.
        let remaining = store::unfinalized_blocks::get_unfinalized_blocks(&indexer.store).await?;
        let remaining_roots: Vec<_> = remaining.iter().map(|row| row.root.clone()).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining_roots.contains(&e.root().as_bytes().to_vec()));
        assert!(remaining_roots.contains(&e2.root().as_bytes().to_vec()));

        let e_row = remaining
            .iter()
            .find(|row| row.root == e.root().as_bytes().to_vec())
            .expect("row is present");
        assert_eq!(e_row.status, store::rows::UnfinalizedBlockStatus::Imported);

        assert!(store::forks::get_unfinalized_forks(&indexer.store, 0)
            .await?
            .is_empty());
        assert_eq!(indexer.fork_cache.fork_count(), 0);

        // Cache entries below the finalized slot are pruned.
        for pruned in [&a, &b, &c, &d, &c2, &d2] {
            assert!(indexer.block_cache.get_by_root(pruned.root()).is_none());
        }

        assert!(indexer.block_cache.get_by_root(e.root()).is_some());
        assert!(indexer.block_cache.get_by_root(e2.root()).is_some());

        // Canonical deposits got monotonically increasing indices, orphaned
        // ones none.
        let max_index = store::deposits::get_max_deposit_index(&indexer.store).await?;
        assert_eq!(max_index, Some(1));

        // Every block carried one exit and one consolidation; the losing
        // branch's rows are flagged as orphaned.
        let exits = store::voluntary_exits::get_voluntary_exits(&indexer.store).await?;
        assert_eq!(exits.len(), 6);
        assert_eq!(exits.iter().filter(|exit| exit.orphaned).count(), 2);
        assert!(exits.iter().all(|exit| exit.validator == 1000));

        let consolidations = store::consolidations::get_consolidations(&indexer.store).await?;
        assert_eq!(consolidations.len(), 6);
        assert_eq!(
            consolidations
                .iter()
                .filter(|consolidation| consolidation.orphaned)
                .count(),
            2,
        );
        assert!(consolidations
            .iter()
            .all(|consolidation| consolidation.source_index == 2000
                && consolidation.target_index == 3000
                && consolidation.epoch == 12));

        // Only D carried a proposer slashing.
        let slashings = store::slashings::get_slashings(&indexer.store).await?;
        assert_eq!(slashings.len(), 1);
        assert_eq!(slashings[0].slot_number, 103);
        assert_eq!(slashings[0].slot_root, d.root().as_bytes().to_vec());
        assert_eq!(slashings[0].validator, 1);
        assert_eq!(slashings[0].slasher, 1);
        assert_eq!(slashings[0].reason, SlashingReason::ProposerSlashing);
        assert!(!slashings[0].orphaned);

        // Every canonical block carried a payload.
        assert_eq!(store::slots::count_slots_with_payload(&indexer.store).await?, 6);

        // Re-delivering the same checkpoint is a no-op.
        process_finalization(indexer, 13, root(0xe)).await?;
        assert_eq!(indexer.chain_state.finalized_epoch(), 13);

        Ok(())
    }

    #[tokio::test]
    async fn finalization_fails_on_incomplete_chain() -> Result<()> {
        let fixture = fixture().await?;
        let indexer = &fixture.indexer;

        indexer.chain_state.set_finalized_checkpoint(12, root(0xa));

        // Head is cached but its ancestry is not.
        insert_full_block(&fixture, 0xe, 104, 0xd, 0, 0).await?;

        process_finalization(indexer, 13, root(0xe))
            .await
            .expect_err("missing ancestry must abort the round");

        // Nothing was deleted.
        assert_eq!(
            store::unfinalized_blocks::get_unfinalized_blocks(&indexer.store)
                .await?
                .len(),
            1,
        );

        Ok(())
    }
}
