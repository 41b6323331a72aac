use core::time::Duration;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use eth1_api::{DepositEvent, Eth1Api, Transaction};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use store::rows::DepositTxRow;
use tokio::sync::Mutex as AsyncMutex;
use types::primitives::{ExecutionBlockNumber, H256};

use crate::Indexer;

pub const DEPOSIT_INDEXER_STATE_KEY: &str = "indexer.depositstate";
pub const DEFAULT_DEPOSIT_LOG_BATCH_SIZE: u64 = 10_000;

const RUN_INTERVAL: Duration = Duration::from_secs(30);
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Highest execution block whose deposit logs are fully persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DepositIndexerState {
    pub final_block: ExecutionBlockNumber,
}

/// Crawls deposit-contract logs up to the finalized execution block.
///
/// Wholly independent from block ingestion; the only shared state is the
/// store and the finalized checkpoint. Any failure aborts the current batch
/// without advancing the persisted state, so the next cycle retries the
/// same range.
pub struct DepositIndexer {
    indexer: Arc<Indexer>,
    api: Arc<Eth1Api>,
    batch_size: u64,
    state: AsyncMutex<Option<DepositIndexerState>>,
}

impl DepositIndexer {
    #[must_use]
    pub fn new(indexer: Arc<Indexer>, api: Arc<Eth1Api>, batch_size: u64) -> Self {
        Self {
            indexer,
            api,
            batch_size,
            state: AsyncMutex::new(None),
        }
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            tokio::time::sleep(RUN_INTERVAL).await;

            debug!("running deposit indexer");

            if let Err(error) = self.run_once().await {
                warn!("deposit indexer error: {error:?}");
            }
        }
    }

    /// One indexing cycle: resolve the finalized execution block number and
    /// process every log batch up to it.
    pub async fn run_once(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.is_none() {
            *state = Some(self.load_state().await?);
        }

        let current = state.expect("state is loaded above");

        let checkpoint = self.indexer.chain_state.finalized_checkpoint();
        ensure!(checkpoint.root != H256::zero(), "no finalization checkpoint");

        let finalized_block = self
            .indexer
            .block_cache
            .get_by_root(checkpoint.root)
            .ok_or_else(|| anyhow!("finalized block {:?} is not cached", checkpoint.root))?;

        if finalized_block.body_index().is_none() {
            finalized_block
                .ensure_body_from_store(&self.indexer.store)
                .await?;
        }

        let finalized_number = finalized_block
            .body_index()
            .and_then(|index| index.execution_number)
            .ok_or_else(|| {
                anyhow!(
                    "finalized block {:?} has no execution block number",
                    checkpoint.root,
                )
            })?;

        ensure!(
            finalized_number >= current.final_block,
            "finalized block number ({finalized_number}) smaller than index state ({})",
            current.final_block,
        );

        if finalized_number > current.final_block {
            let advanced = self.process_finalized_blocks(current, finalized_number).await?;
            *state = Some(advanced);
        }

        Ok(())
    }

    async fn load_state(&self) -> Result<DepositIndexerState> {
        let stored =
            store::state::get_explorer_state(&self.indexer.store, DEPOSIT_INDEXER_STATE_KEY)
                .await?;

        Ok(stored
            .map(|value| serde_json::from_str(&value))
            .transpose()?
            .unwrap_or_default())
    }

    async fn process_finalized_blocks(
        &self,
        mut state: DepositIndexerState,
        finalized_number: ExecutionBlockNumber,
    ) -> Result<DepositIndexerState> {
        while state.final_block < finalized_number {
            let from_block = state.final_block;
            let to_block = finalized_number.min(from_block + self.batch_size);

            let logs = self.api.get_deposit_logs(from_block..=to_block).await?;

            let mut deposit_txs = vec![];
            let mut last_transaction: Option<(H256, Transaction)> = None;

            for log in logs {
                if log.topics.first() != Some(&DepositEvent::TOPIC) {
                    continue;
                }

                let (Some(block_number), Some(block_hash), Some(tx_hash)) =
                    (log.block_number, log.block_hash, log.transaction_hash)
                else {
                    continue;
                };

                let event = match DepositEvent::try_from(log) {
                    Ok(event) => event,
                    Err(error) => {
                        warn!("skipping undecodable deposit log in block {block_number}: {error}");
                        continue;
                    }
                };

                // Several deposits usually share one transaction; resolve
                // each hash once.
                let transaction = match &last_transaction {
                    Some((hash, transaction)) if *hash == tx_hash => transaction.clone(),
                    _ => {
                        let transaction = self
                            .api
                            .get_transaction(tx_hash)
                            .await?
                            .ok_or_else(|| anyhow!("transaction {tx_hash:?} not found"))?;

                        last_transaction = Some((tx_hash, transaction.clone()));
                        transaction
                    }
                };

                let sender = transaction
                    .from
                    .ok_or_else(|| anyhow!("transaction {tx_hash:?} has no sender"))?;
                let target = transaction.to.unwrap_or_default();

                deposit_txs.push(DepositTxRow {
                    deposit_index: event.index,
                    block_number: block_number.as_u64(),
                    block_time: 0,
                    block_root: block_hash.as_bytes().to_vec(),
                    publickey: event.pubkey.as_bytes().to_vec(),
                    withdrawal_credentials: event.withdrawal_credentials.as_bytes().to_vec(),
                    amount: event.amount,
                    signature: event.signature.as_bytes().to_vec(),
                    valid_signature: 0,
                    orphaned: false,
                    tx_hash: tx_hash.as_bytes().to_vec(),
                    tx_sender: sender.as_bytes().to_vec(),
                    tx_target: target.as_bytes().to_vec(),
                });
            }

            if !deposit_txs.is_empty() {
                info!(
                    "crawled deposits for blocks {from_block} - {to_block}: {} deposits",
                    deposit_txs.len(),
                );
            }

            // The batch and the state advance must commit together.
            state.final_block = to_block;
            let value = serde_json::to_string(&state)?;

            self.indexer
                .store
                .run_transaction(move |tx| {
                    store::deposits::insert_deposit_txs(tx, &deposit_txs)?;
                    store::state::set_explorer_state(tx, DEPOSIT_INDEXER_STATE_KEY, &value)
                })
                .await?;

            if state.final_block < finalized_number {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use store::schema;
    use types::config::ChainConfig;

    use crate::block::tests::{block_body, signed_header};

    use super::*;

    // Word offsets of the raw `DepositEvent` payload, matching the ABI
    // layout the contract emits.
    const PUBKEY_OFFSET: usize = 6 * 32;
    const CREDENTIALS_OFFSET: usize = 9 * 32;
    const AMOUNT_OFFSET: usize = 11 * 32;
    const SIGNATURE_OFFSET: usize = 13 * 32;
    const INDEX_OFFSET: usize = 17 * 32;

    fn encode_deposit_log_data(index: u64) -> String {
        let mut data = vec![0_u8; DepositEvent::LENGTH];

        data[PUBKEY_OFFSET..PUBKEY_OFFSET + 48].fill(0xaa);
        data[CREDENTIALS_OFFSET..CREDENTIALS_OFFSET + 32].fill(0xbb);
        data[AMOUNT_OFFSET..AMOUNT_OFFSET + 8]
            .copy_from_slice(&32_000_000_000_u64.to_le_bytes());
        data[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 96].fill(0xcc);
        data[INDEX_OFFSET..INDEX_OFFSET + 8].copy_from_slice(&index.to_le_bytes());

        let mut hex = String::with_capacity(2 + data.len() * 2);
        hex.push_str("0x");

        for byte in data {
            hex.push_str(&format!("{byte:02x}"));
        }

        hex
    }

    fn deposit_log_json(index: u64) -> serde_json::Value {
        serde_json::json!({
            "address": format!("{:?}", ChainConfig::minimal().deposit_contract_address),
            "topics": [format!("{:?}", DepositEvent::TOPIC)],
            "data": encode_deposit_log_data(index),
            "blockHash": format!("{:?}", H256::repeat_byte(0x77)),
            "blockNumber": "0x1388",
            "transactionHash": format!("{:?}", H256::repeat_byte(0x99)),
            "transactionIndex": "0x0",
            "logIndex": format!("0x{index:x}"),
            "removed": false,
        })
    }

    fn transaction_json() -> serde_json::Value {
        serde_json::json!({
            "hash": format!("{:?}", H256::repeat_byte(0x99)),
            "nonce": "0x0",
            "blockHash": format!("{:?}", H256::repeat_byte(0x77)),
            "blockNumber": "0x1388",
            "transactionIndex": "0x0",
            "from": "0x1111111111111111111111111111111111111111",
            "to": format!("{:?}", ChainConfig::minimal().deposit_contract_address),
            "value": "0x0",
            "gas": "0x5208",
            "gasPrice": "0x1",
            "input": "0x",
        })
    }

    struct Fixture {
        indexer: Arc<Indexer>,
        deposit_indexer: DepositIndexer,
        logs_mock: httpmock::Mock<'static>,
        transaction_mock: httpmock::Mock<'static>,
    }

    async fn fixture(server: &'static MockServer) -> Result<Fixture> {
        let store = store::Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let chain_config = ChainConfig::minimal();
        let (indexer, _finalization_rx) = Indexer::new(
            &crate::IndexerConfig::default(),
            Arc::new(chain_config.clone()),
            store,
        );

        // The finalized beacon block resolves to execution block 10 000.
        let finalized_root = H256::repeat_byte(0xfe);
        indexer.chain_state.set_finalized_checkpoint(1, finalized_root);

        let (block, _) = indexer.block_cache.insert_or_get(finalized_root, 8);
        block.set_header(signed_header(8, H256::repeat_byte(0xfd)));
        block.set_body(Arc::new(block_body(8, Some(10_000))));

        let logs_mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .body_contains("eth_getLogs");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": [
                    deposit_log_json(0),
                    deposit_log_json(1),
                    deposit_log_json(2),
                ],
            }));
        });

        let transaction_mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .body_contains("eth_getTransactionByHash");
            then.status(200).json_body(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": transaction_json(),
            }));
        });

        let api = Arc::new(Eth1Api::new(
            &server.base_url(),
            chain_config.deposit_contract_address,
        )?);

        let deposit_indexer = DepositIndexer::new(
            indexer.clone(),
            api,
            DEFAULT_DEPOSIT_LOG_BATCH_SIZE,
        );

        Ok(Fixture {
            indexer,
            deposit_indexer,
            logs_mock,
            transaction_mock,
        })
    }

    /// One batch covers the whole range: three deposit rows appear, the
    /// state row advances to the finalized block, and a second cycle does
    /// not touch the execution node again.
    #[tokio::test]
    async fn batch_is_persisted_and_state_advances() -> Result<()> {
        let server = Box::leak(Box::new(MockServer::start()));
        let fixture = fixture(server).await?;

        fixture.deposit_indexer.run_once().await?;

        assert_eq!(
            store::deposits::get_deposit_tx_count(&fixture.indexer.store).await?,
            3,
        );

        let rows = store::deposits::get_deposit_txs(&fixture.indexer.store).await?;
        assert_eq!(rows[0].deposit_index, 0);
        assert_eq!(rows[2].deposit_index, 2);
        assert_eq!(rows[0].block_number, 5000);
        assert_eq!(rows[0].tx_sender, vec![0x11; 20]);

        let state = store::state::get_explorer_state(
            &fixture.indexer.store,
            DEPOSIT_INDEXER_STATE_KEY,
        )
        .await?
        .expect("state should be persisted");

        assert_eq!(
            serde_json::from_str::<DepositIndexerState>(&state)?,
            DepositIndexerState {
                final_block: 10_000,
            },
        );

        // All three logs share one transaction; it is resolved once.
        fixture.logs_mock.assert_hits(1);
        fixture.transaction_mock.assert_hits(1);

        // Nothing new is finalized, so the second cycle is a no-op.
        fixture.deposit_indexer.run_once().await?;

        fixture.logs_mock.assert_hits(1);
        assert_eq!(
            store::deposits::get_deposit_tx_count(&fixture.indexer.store).await?,
            3,
        );

        Ok(())
    }
}
