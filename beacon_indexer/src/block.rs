use core::{future::Future, time::Duration};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, OnceLock, RwLock,
    },
};

use anyhow::{ensure, Result};
use store::{
    rows::{OrphanedBlockRow, UnfinalizedBlockRow, UnfinalizedBlockStatus},
    Store,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use types::{
    codec,
    containers::{SignedBlockHeader, VersionedSignedBlock},
    primitives::{ForkId, Slot, H256},
};

/// Identifies one upstream consensus client within this process.
pub type ClientIndex = u16;

#[derive(Debug, Error)]
enum Error {
    #[error("header of block {root:?} has not arrived yet")]
    HeaderMissing { root: H256 },
    #[error("body of block {root:?} has not arrived yet")]
    BodyMissing { root: H256 },
}

/// Fields extracted from the block body once, so the body itself does not
/// have to stay in memory for the common queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockBodyIndex {
    pub graffiti: H256,
    pub execution_hash: Option<H256>,
    pub execution_number: Option<u64>,
    pub execution_extra_data: Option<Vec<u8>>,
}

impl BlockBodyIndex {
    fn from_block(block: &VersionedSignedBlock) -> Self {
        Self {
            graffiti: block.graffiti(),
            execution_hash: block.execution_block_hash(),
            execution_number: block.execution_block_number(),
            execution_extra_data: block
                .execution_payload()
                .map(|payload| payload.extra_data.clone()),
        }
    }
}

/// A beacon block above the finalized boundary.
///
/// Constructed from nothing but a root and a slot; the header and body
/// arrive later, possibly from different clients. Each of the two fields is
/// acquire-once: a single loader wins, everyone else waits on a closed-once
/// notification. Once set, reads are lock-free.
pub struct Block {
    root: H256,
    slot: Slot,
    header: OnceLock<SignedBlockHeader>,
    header_notify: watch::Sender<bool>,
    header_load: AsyncMutex<()>,
    body: RwLock<Option<Arc<VersionedSignedBlock>>>,
    body_notify: watch::Sender<bool>,
    body_load: AsyncMutex<()>,
    body_index: OnceLock<BlockBodyIndex>,
    fork_id: AtomicU64,
    status: AtomicU8,
    in_unfinalized_store: AtomicBool,
    in_finalized_store: AtomicBool,
    seen_by: RwLock<BTreeSet<ClientIndex>>,
}

impl Block {
    pub(crate) fn new(root: H256, slot: Slot) -> Self {
        let (header_notify, _) = watch::channel(false);
        let (body_notify, _) = watch::channel(false);

        Self {
            root,
            slot,
            header: OnceLock::new(),
            header_notify,
            header_load: AsyncMutex::new(()),
            body: RwLock::new(None),
            body_notify,
            body_load: AsyncMutex::new(()),
            body_index: OnceLock::new(),
            fork_id: AtomicU64::new(0),
            status: AtomicU8::new(UnfinalizedBlockStatus::Pending as u8),
            in_unfinalized_store: AtomicBool::new(false),
            in_finalized_store: AtomicBool::new(false),
            seen_by: RwLock::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub const fn root(&self) -> H256 {
        self.root
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    #[must_use]
    pub fn header(&self) -> Option<&SignedBlockHeader> {
        self.header.get()
    }

    #[must_use]
    pub fn parent_root(&self) -> Option<H256> {
        self.header().map(|header| header.message.parent_root)
    }

    /// Sets the header. Only the first call takes effect; it also wakes all
    /// `await_header` callers.
    pub fn set_header(&self, header: SignedBlockHeader) -> bool {
        if self.header.set(header).is_err() {
            return false;
        }

        self.header_notify.send_replace(true);

        true
    }

    /// Loads the header through `load_header` unless it is already present.
    /// Concurrent callers are serialized; only one of them performs the load.
    pub async fn ensure_header<F, Fut>(&self, load_header: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SignedBlockHeader>>,
    {
        if self.header.get().is_some() {
            return Ok(());
        }

        let _guard = self.header_load.lock().await;

        if self.header.get().is_some() {
            return Ok(());
        }

        let header = load_header().await?;
        self.set_header(header);

        Ok(())
    }

    /// Waits until the header is set or the timeout fires and returns
    /// whatever is present at that point. Multi-waiter safe.
    pub async fn await_header(&self, timeout: Duration) -> Option<&SignedBlockHeader> {
        if self.header.get().is_none() {
            let mut notified = self.header_notify.subscribe();
            let _ = tokio::time::timeout(timeout, notified.wait_for(|set| *set)).await;
        }

        self.header.get()
    }

    #[must_use]
    pub fn body(&self) -> Option<Arc<VersionedSignedBlock>> {
        self.body.read().expect("block body lock is poisoned").clone()
    }

    /// Sets the body and derives the body index. Only the first call takes
    /// effect; it also wakes all `await_body` callers.
    pub fn set_body(&self, body: Arc<VersionedSignedBlock>) -> bool {
        {
            let mut current = self.body.write().expect("block body lock is poisoned");

            if current.is_some() {
                return false;
            }

            let _ = self.body_index.set(BlockBodyIndex::from_block(&body));
            *current = Some(body);
        }

        self.body_notify.send_replace(true);

        true
    }

    pub async fn ensure_body<F, Fut>(&self, load_body: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VersionedSignedBlock>>,
    {
        if self.body().is_some() {
            return Ok(false);
        }

        let _guard = self.body_load.lock().await;

        if self.body().is_some() {
            return Ok(false);
        }

        let body = load_body().await?;
        self.set_body(Arc::new(body));

        Ok(true)
    }

    pub async fn await_body(&self, timeout: Duration) -> Option<Arc<VersionedSignedBlock>> {
        if self.body().is_none() {
            let mut notified = self.body_notify.subscribe();
            let _ = tokio::time::timeout(timeout, notified.wait_for(|set| *set)).await;
        }

        self.body()
    }

    /// Re-reads a dropped body from the unfinalized table.
    pub async fn ensure_body_from_store(
        &self,
        store: &Store,
    ) -> Result<Option<Arc<VersionedSignedBlock>>> {
        if let Some(body) = self.body() {
            return Ok(Some(body));
        }

        if !self.is_in_unfinalized_store() {
            return Ok(None);
        }

        let Some(row) =
            store::unfinalized_blocks::get_unfinalized_block(store, self.root.as_bytes()).await?
        else {
            return Ok(None);
        };

        let body = codec::unmarshal_versioned_signed_block(row.block_ver, &row.block_ssz)?;
        self.set_body(Arc::new(body));

        Ok(self.body())
    }

    #[must_use]
    pub fn body_index(&self) -> Option<BlockBodyIndex> {
        if let Some(index) = self.body_index.get() {
            return Some(index.clone());
        }

        let body = self.body()?;
        let _ = self.body_index.set(BlockBodyIndex::from_block(&body));

        self.body_index.get().cloned()
    }

    #[must_use]
    pub fn fork_id(&self) -> ForkId {
        self.fork_id.load(Ordering::Acquire)
    }

    /// Only the fork cache (under its process lock) and startup restore may
    /// relabel a block.
    pub(crate) fn set_fork_id(&self, fork_id: ForkId) {
        self.fork_id.store(fork_id, Ordering::Release);
    }

    #[must_use]
    pub fn status(&self) -> UnfinalizedBlockStatus {
        UnfinalizedBlockStatus::try_from(self.status.load(Ordering::Acquire))
            .unwrap_or(UnfinalizedBlockStatus::Pending)
    }

    pub(crate) fn set_status(&self, status: UnfinalizedBlockStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Claims the block for fork processing. Exactly one ingestor wins per
    /// block; a failed attempt frees the claim via [`Self::set_status`].
    pub(crate) fn begin_processing(&self) -> bool {
        let processed = UnfinalizedBlockStatus::Processed as u8;

        [
            UnfinalizedBlockStatus::Pending as u8,
            UnfinalizedBlockStatus::Failed as u8,
        ]
        .iter()
        .any(|current| {
            self.status
                .compare_exchange(*current, processed, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    #[must_use]
    pub fn is_in_unfinalized_store(&self) -> bool {
        self.in_unfinalized_store.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_unfinalized_store(&self, present: bool) {
        self.in_unfinalized_store.store(present, Ordering::Release);
    }

    #[must_use]
    pub fn is_in_finalized_store(&self) -> bool {
        self.in_finalized_store.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_finalized_store(&self, present: bool) {
        self.in_finalized_store.store(present, Ordering::Release);
    }

    pub fn set_seen_by(&self, client: ClientIndex) {
        self.seen_by
            .write()
            .expect("seen-by lock is poisoned")
            .insert(client);
    }

    #[must_use]
    pub fn seen_by(&self) -> Vec<ClientIndex> {
        self.seen_by
            .read()
            .expect("seen-by lock is poisoned")
            .iter()
            .copied()
            .collect()
    }

    pub fn to_unfinalized_row(&self, compress: bool) -> Result<UnfinalizedBlockRow> {
        let header = self.header().ok_or(Error::HeaderMissing { root: self.root })?;
        let body = self.body().ok_or(Error::BodyMissing { root: self.root })?;

        ensure!(
            header.message.slot == self.slot,
            "header slot {} does not match block slot {}",
            header.message.slot,
            self.slot,
        );

        let (block_ver, block_ssz) = codec::marshal_versioned_signed_block(&body, compress)?;
        let payload = self.marshal_payload(&body, compress)?;

        Ok(UnfinalizedBlockRow {
            root: self.root.as_bytes().to_vec(),
            slot: self.slot,
            header_ver: codec::HEADER_VERSION,
            header_ssz: codec::encode_signed_header(header),
            block_ver,
            block_ssz,
            status: self.status(),
            fork_id: self.fork_id(),
            payload_ver: payload.as_ref().map(|(version, _)| *version),
            payload_ssz: payload.map(|(_, bytes)| bytes),
        })
    }

    pub fn to_orphaned_row(&self, compress: bool) -> Result<OrphanedBlockRow> {
        let header = self.header().ok_or(Error::HeaderMissing { root: self.root })?;
        let body = self.body().ok_or(Error::BodyMissing { root: self.root })?;

        let (block_ver, block_ssz) = codec::marshal_versioned_signed_block(&body, compress)?;
        let payload = self.marshal_payload(&body, compress)?;

        Ok(OrphanedBlockRow {
            root: self.root.as_bytes().to_vec(),
            header_ver: codec::HEADER_VERSION,
            header_ssz: codec::encode_signed_header(header),
            block_ver,
            block_ssz,
            payload_ver: payload.as_ref().map(|(version, _)| *version),
            payload_ssz: payload.map(|(_, bytes)| bytes),
        })
    }

    fn marshal_payload(
        &self,
        body: &VersionedSignedBlock,
        compress: bool,
    ) -> Result<Option<(u8, Vec<u8>)>> {
        body.execution_payload()
            .map(|payload| codec::marshal_execution_payload(payload, compress))
            .transpose()
    }
}
