use core::time::Duration;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use beacon_api::{BeaconApiClient, BlockEvent, FinalizedCheckpointEvent};
use eventstream::{EventRecord, EventStream};
use futures::StreamExt as _;
use log::{debug, info, warn};
use reqwest::Client as HttpClient;
use store::rows::UnfinalizedBlockStatus;
use types::primitives::{ForkId, Slot, H256};

use crate::{block::Block, Indexer};

const EVENT_TOPICS: &[&str] = &["head", "block", "finalized_checkpoint"];
const BODY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub name: String,
    pub index: u16,
    pub endpoint: String,
}

/// Ingestion worker for one upstream consensus client.
///
/// Subscribes to the client's event stream and drives blocks through the
/// cache: header first, body in the background, then fork processing and
/// persistence. Several workers may race on the same block; the per-field
/// loaders and the processing claim keep all of that idempotent.
pub struct ConsensusClient {
    config: ClientConfig,
    api: BeaconApiClient,
}

impl ConsensusClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let api = BeaconApiClient::new(HttpClient::new(), config.endpoint.clone());

        Self { config, api }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub const fn api(&self) -> &BeaconApiClient {
        &self.api
    }

    /// Consumes the event stream until it is closed. Event-level failures
    /// are logged and do not abort the subscription.
    pub async fn run(&self, indexer: &Arc<Indexer>) -> Result<()> {
        let stream_client = eventstream::build_client()?;
        let url = self.api.events_url(EVENT_TOPICS);
        let mut stream = EventStream::subscribe(stream_client, url, None);

        info!("[{}] subscribed to event stream", self.config.name);

        loop {
            tokio::select! {
                record = stream.events.next() => {
                    let Some(record) = record else {
                        break;
                    };

                    if let Err(error) = self.handle_event(indexer, &record).await {
                        warn!(
                            "[{}] failed to process {:?} event: {error:?}",
                            self.config.name,
                            record.event,
                        );
                    }
                }
                error = stream.errors.next() => {
                    if let Some(error) = error {
                        warn!("[{}] event stream error: {error}", self.config.name);
                    }
                }
            }
        }

        stream.close().await;

        Ok(())
    }

    async fn handle_event(&self, indexer: &Arc<Indexer>, record: &EventRecord) -> Result<()> {
        match record.event.as_deref() {
            Some("head" | "block") => {
                let event = serde_json::from_str::<BlockEvent>(&record.data)?;
                self.process_block_event(indexer, event.block, event.slot)
                    .await
            }
            Some("finalized_checkpoint") => {
                let event = serde_json::from_str::<FinalizedCheckpointEvent>(&record.data)?;
                indexer.submit_finalized_checkpoint(event.epoch, event.block);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn process_block_event(
        &self,
        indexer: &Arc<Indexer>,
        root: H256,
        slot: Slot,
    ) -> Result<()> {
        if slot < indexer.chain_state.finalized_slot() {
            debug!(
                "[{}] ignoring event for already finalized slot {slot}",
                self.config.name,
            );
            return Ok(());
        }

        let (block, created) = indexer.block_cache.insert_or_get(root, slot);
        block.set_seen_by(self.config.index);

        if created {
            debug!("[{}] new block {root:?} at slot {slot}", self.config.name);
        }

        block
            .ensure_header(|| async move {
                self.api
                    .get_block_header(root)
                    .await?
                    .ok_or_else(|| anyhow!("header of {root:?} not found on {}", self.config.name))
            })
            .await?;

        self.spawn_body_fetch(&block);

        if !block.begin_processing() {
            return Ok(());
        }

        match self.import_block(indexer, &block).await {
            Ok(fork_id) => {
                debug!(
                    "[{}] imported block {root:?} at slot {slot} on fork {fork_id}",
                    self.config.name,
                );
                Ok(())
            }
            Err(error) => {
                // Free the claim so a later observation can retry.
                block.set_status(UnfinalizedBlockStatus::Failed);
                Err(error)
            }
        }
    }

    /// Fetches the block body in the background; `set_body` wakes whoever
    /// is waiting on it.
    fn spawn_body_fetch(&self, block: &Arc<Block>) {
        if block.body().is_some() {
            return;
        }

        let api = self.api.clone();
        let name = self.config.name.clone();
        let block = block.clone();

        tokio::spawn(async move {
            let root = block.root();

            let result = block
                .ensure_body(|| async move {
                    api.get_block(root)
                        .await?
                        .ok_or_else(|| anyhow!("body of {root:?} not found on {name}"))
                })
                .await;

            if let Err(error) = result {
                warn!("body fetch for {root:?} failed: {error:?}");
            }
        });
    }

    async fn import_block(&self, indexer: &Arc<Indexer>, block: &Arc<Block>) -> Result<ForkId> {
        let fork_id = indexer.fork_cache.process_block(block).await?;

        if block.await_body(BODY_TIMEOUT).await.is_none() {
            return Err(anyhow!(
                "body of {:?} did not arrive within {BODY_TIMEOUT:?}",
                block.root(),
            ));
        }

        let row = block.to_unfinalized_row(true)?;
        let epoch = indexer.chain_state.epoch_of_slot(block.slot());
        let payload_count = indexer
            .block_cache
            .epoch_payload_count(epoch, indexer.chain_state.config());

        indexer
            .store
            .run_transaction(move |tx| {
                store::unfinalized_blocks::insert_unfinalized_block(tx, &row)?;
                store::epochs::upsert_unfinalized_epoch(tx, epoch, payload_count)
            })
            .await?;

        block.set_in_unfinalized_store(true);

        Ok(fork_id)
    }
}
