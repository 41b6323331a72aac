//! Client for the subset of the Eth Beacon Node API the indexer consumes:
//! headers and blocks by root, finality checkpoints, and the events URL.

use core::time::Duration;

use anyhow::Result;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use types::{
    containers::{Checkpoint, SignedBlockHeader, VersionedSignedBlock},
    primitives::{Epoch, Slot, H256},
    serde_utils::quoted_u64,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BeaconApiError {
    #[error("received unexpected status code: {received}")]
    UnexpectedStatusCode { received: StatusCode },
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct HeaderData {
    header: SignedBlockHeader,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct FinalityCheckpoints {
    pub current_justified: Checkpoint,
    pub finalized: Checkpoint,
}

/// Payload of `head` and `block` events.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BlockEvent {
    #[serde(with = "quoted_u64")]
    pub slot: Slot,
    pub block: H256,
}

/// Payload of `finalized_checkpoint` events.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct FinalizedCheckpointEvent {
    #[serde(with = "quoted_u64")]
    pub epoch: Epoch,
    pub block: H256,
    pub state: H256,
}

#[derive(Clone)]
pub struct BeaconApiClient {
    client: Client,
    endpoint: String,
}

impl BeaconApiClient {
    #[must_use]
    pub fn new(client: Client, endpoint: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn events_url(&self, topics: &[&str]) -> String {
        format!(
            "{}/eth/v1/events?topics={}",
            self.endpoint,
            topics.join(","),
        )
    }

    /// Fetches the signed header of a block. `None` if the node does not
    /// know the root.
    pub async fn get_block_header(&self, root: H256) -> Result<Option<SignedBlockHeader>> {
        let url = format!("{}/eth/v1/beacon/headers/{root:?}", self.endpoint);

        let Some(response) = self.get(&url).await? else {
            return Ok(None);
        };

        let envelope = response.json::<DataEnvelope<HeaderData>>().await?;

        Ok(Some(envelope.data.header))
    }

    /// Fetches a block by root with its fork version.
    pub async fn get_block(&self, root: H256) -> Result<Option<VersionedSignedBlock>> {
        let url = format!("{}/eth/v2/beacon/blocks/{root:?}", self.endpoint);

        let Some(response) = self.get(&url).await? else {
            return Ok(None);
        };

        Ok(Some(response.json().await?))
    }

    pub async fn get_finality_checkpoints(&self) -> Result<Option<FinalityCheckpoints>> {
        let url = format!(
            "{}/eth/v1/beacon/states/head/finality_checkpoints",
            self.endpoint,
        );

        let Some(response) = self.get(&url).await? else {
            return Ok(None);
        };

        let envelope = response.json::<DataEnvelope<FinalityCheckpoints>>().await?;

        Ok(Some(envelope.data))
    }

    async fn get(&self, url: &str) -> Result<Option<reqwest::Response>> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response)),
            StatusCode::NOT_FOUND => Ok(None),
            received => Err(BeaconApiError::UnexpectedStatusCode { received }.into()),
        }
    }
}
