//! Execution-layer JSON-RPC client.
//!
//! Scans deposit-contract logs by block range and resolves the transactions
//! that emitted them. Only the calls the deposit indexer needs are exposed.

use core::ops::RangeInclusive;

use anyhow::Result;
use log::debug;
use types::primitives::{ExecutionAddress, ExecutionBlockNumber, H256};
use web3::{
    transports::Http,
    types::{BlockNumber, FilterBuilder, Log, TransactionId, U64},
    Web3,
};

mod deposit_event;

pub use deposit_event::DepositEvent;
pub use web3::types::Transaction;

pub struct Eth1Api {
    web3: Web3<Http>,
    deposit_contract_address: ExecutionAddress,
}

impl Eth1Api {
    pub fn new(rpc_url: &str, deposit_contract_address: ExecutionAddress) -> Result<Self> {
        let transport = Http::new(rpc_url)?;

        Ok(Self {
            web3: Web3::new(transport),
            deposit_contract_address,
        })
    }

    pub async fn current_head_number(&self) -> Result<ExecutionBlockNumber> {
        Ok(self.web3.eth().block_number().await?.as_u64())
    }

    /// Fetches raw deposit-contract logs in the given block range.
    /// The topic filter is applied server-side; callers still re-check it
    /// because some networks run custom contracts emitting extra events.
    pub async fn get_deposit_logs(
        &self,
        block_number_range: RangeInclusive<ExecutionBlockNumber>,
    ) -> Result<Vec<Log>> {
        let filter = FilterBuilder::default()
            .from_block(BlockNumber::Number(U64::from(*block_number_range.start())))
            .to_block(BlockNumber::Number(U64::from(*block_number_range.end())))
            .address(vec![self.deposit_contract_address])
            .topics(Some(vec![DepositEvent::TOPIC]), None, None, None)
            .build();

        let logs = self.web3.eth().logs(filter).await?;

        debug!(
            "fetched {} deposit contract logs in blocks {}..={}",
            logs.len(),
            block_number_range.start(),
            block_number_range.end(),
        );

        Ok(logs)
    }

    pub async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>> {
        Ok(self
            .web3
            .eth()
            .transaction(TransactionId::Hash(hash))
            .await?)
    }
}
