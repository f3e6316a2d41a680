//! Turns client mutation batches into committed writes.
//!
//! Every batch is applied as one atomic write, then answered with a fresh
//! strongly consistent snapshot. Clients never see a partial batch and never
//! need to merge anything: the snapshot replaces whatever they had.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ListError, Result};
use crate::ids::{ListId, SessionId};
use crate::model::{MutationBatch, Snapshot};
use crate::repository::ListRepository;
use crate::store::{Consistency, KvStore};

/// Base delay between commit retries; grows linearly per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Attempts at a write whose list metadata keeps changing underneath it.
const MAX_META_RACES: u32 = 5;

pub struct Reconciler<S> {
    repo: Arc<ListRepository<S>>,
    commit_retries: u32,
}

impl<S: KvStore> Reconciler<S> {
    /// `commit_retries` is how many extra attempts a transient commit
    /// failure gets before it is reported.
    pub fn new(repo: Arc<ListRepository<S>>, commit_retries: u32) -> Self {
        Self { repo, commit_retries }
    }

    pub fn repository(&self) -> &Arc<ListRepository<S>> {
        &self.repo
    }

    /// Parse a raw inbound message and apply it.
    pub async fn apply_message(
        &self,
        list_id: &ListId,
        requester: Option<&SessionId>,
        raw: &str,
    ) -> Result<Snapshot> {
        let batch = MutationBatch::parse(raw)?;
        self.apply(list_id, requester, &batch).await
    }

    /// Apply a batch on behalf of `requester` and return the resulting
    /// snapshot. Anyone who can see the list can write to it.
    ///
    /// The write only commits if the list metadata is unchanged since the
    /// access check; if it changed, access is checked again, so a list made
    /// private mid-write rejects the batch with `NotFound`.
    pub async fn apply(
        &self,
        list_id: &ListId,
        requester: Option<&SessionId>,
        batch: &MutationBatch,
    ) -> Result<Snapshot> {
        let mut failures = 0;
        let mut races = 0;
        loop {
            let (_, meta_versionstamp) = self.repo.visible_meta(list_id, Consistency::Strong, requester).await?;

            match self.repo.write_items_if_meta(list_id, batch, meta_versionstamp).await {
                Ok(Some(_)) => break,
                Ok(None) if races + 1 < MAX_META_RACES => {
                    races += 1;
                    debug!("List {} metadata changed during write, rechecking access", list_id);
                }
                Ok(None) => return Err(ListError::Contention(MAX_META_RACES)),
                Err(e) if e.is_transient() && failures < self.commit_retries => {
                    failures += 1;
                    warn!("Commit to list {} failed ({}), retry {}/{}", list_id, e, failures, self.commit_retries);
                    tokio::time::sleep(RETRY_DELAY * failures).await;
                }
                Err(e) => return Err(e),
            }
        }

        debug!("Applied batch of {} to list {}", batch.len(), list_id);
        self.repo.load_list(list_id, Consistency::Strong, requester).await
    }
}
