//! Wires the subsystems together and keeps them running: store, caches,
//! per-client ingestors, the finalization driver and the deposit indexer,
//! each in its own supervised task.

use core::time::Duration;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use beacon_indexer::{
    client::{ClientConfig, ConsensusClient},
    deposit_indexer::DepositIndexer,
    finalization::FinalizationDriver,
    Indexer, IndexerConfig,
};
use eth1_api::Eth1Api;
use log::{info, warn};
use store::{schema, Store, StoreConfig};
use types::config::ChainConfig;

pub mod supervisor;

use supervisor::run_supervised;

const RESTART_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub indexer: IndexerConfig,
    pub consensus_clients: Vec<ClientConfig>,
    pub execution_rpc_url: String,
}

/// Starts every subsystem and blocks until an interrupt or terminate
/// signal arrives.
pub async fn run(config: RuntimeConfig) -> Result<()> {
    ensure!(
        !config.consensus_clients.is_empty(),
        "at least one consensus client is required",
    );

    let store = {
        let store_config = config.store.clone();
        tokio::task::spawn_blocking(move || Store::open(&store_config)).await??
    };

    schema::apply_schema(&store).await?;

    let chain_config = Arc::new(config.chain);
    let (indexer, finalization_rx) =
        Indexer::new(&config.indexer, chain_config.clone(), store);

    let clients: Vec<Arc<ConsensusClient>> = config
        .consensus_clients
        .into_iter()
        .map(|client_config| Arc::new(ConsensusClient::new(client_config)))
        .collect();

    // Without a finalized checkpoint there is no pruning boundary; refusing
    // to start is better than indexing unbounded history.
    let mut finalized = None;

    for client in &clients {
        match client.api().get_finality_checkpoints().await {
            Ok(Some(checkpoints)) => {
                finalized = Some(checkpoints.finalized);
                break;
            }
            Ok(None) => warn!("[{}] node has no finality checkpoints yet", client.name()),
            Err(error) => warn!(
                "[{}] could not fetch finality checkpoints: {error}",
                client.name(),
            ),
        }
    }

    let finalized =
        finalized.ok_or_else(|| anyhow!("no consensus client provided a finalization checkpoint"))?;

    indexer
        .chain_state
        .set_finalized_checkpoint(finalized.epoch, finalized.root);

    info!(
        "starting at finalized epoch {} ({:?})",
        finalized.epoch, finalized.root,
    );

    indexer.restore_unfinalized().await?;

    let eth1_api = Arc::new(Eth1Api::new(
        &config.execution_rpc_url,
        chain_config.deposit_contract_address,
    )?);

    let finalization_driver = Arc::new(FinalizationDriver::new(
        indexer.clone(),
        finalization_rx,
    ));

    let deposit_indexer = Arc::new(DepositIndexer::new(
        indexer.clone(),
        eth1_api,
        config.indexer.deposit_log_batch_size,
    ));

    let mut tasks = vec![];

    for client in clients {
        let task_name = format!("client {}", client.name());
        let indexer = indexer.clone();

        tasks.push(tokio::spawn(run_supervised(
            task_name,
            RESTART_DELAY,
            move || {
                let client = client.clone();
                let indexer = indexer.clone();

                async move { client.run(&indexer).await }
            },
        )));
    }

    tasks.push(tokio::spawn(run_supervised(
        "finalization driver".to_owned(),
        RESTART_DELAY,
        move || {
            let driver = finalization_driver.clone();

            async move { driver.run().await }
        },
    )));

    tasks.push(tokio::spawn(run_supervised(
        "deposit indexer".to_owned(),
        RESTART_DELAY,
        move || {
            let deposit_indexer = deposit_indexer.clone();

            async move { deposit_indexer.run().await }
        },
    )));

    wait_for_signal().await?;

    info!("shutting down");

    for task in &tasks {
        task.abort();
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::SignalKind;

    let mut interrupt = tokio::signal::unix::signal(SignalKind::interrupt())?;
    let mut terminate = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;

    Ok(())
}
