//! Client-side sync agent.
//!
//! Holds the last snapshot pushed by the server plus local edits that have
//! not been sent yet. Edits to the same item coalesce into one pending
//! mutation; the transport drains them as a single batch on each flush tick.
//! The agent never merges: every pushed snapshot replaces local data as is.
//!
//! Sent mutations stay in flight until a snapshot shows their effect. A
//! snapshot that does not (another client's write, the initial push on
//! connect, a batch the server failed to commit) leaves them in flight, and
//! `connection_lost` queues them again.

use tracing::debug;

use crate::error::AgentError;
use crate::ids::ItemId;
use crate::model::{Mutation, MutationBatch, Snapshot, MAX_BATCH_LEN};

#[derive(Debug, Default)]
pub struct SyncAgent {
    data: Option<Snapshot>,
    /// Insertion-ordered, one entry per item id
    pending: Vec<Mutation>,
    /// Sent mutations no snapshot has shown yet, one entry per item id
    in_flight: Vec<Mutation>,
}

impl SyncAgent {
    pub fn new(initial: Option<Snapshot>) -> Self {
        Self {
            data: initial,
            pending: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Last snapshot received from the server.
    pub fn data(&self) -> Option<&Snapshot> {
        self.data.as_ref()
    }

    pub fn pending(&self) -> &[Mutation] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Local work not yet reflected by the server.
    pub fn is_busy(&self) -> bool {
        self.has_pending() || !self.in_flight.is_empty()
    }

    /// Queue a new item and return its freshly minted id.
    pub fn add(&mut self, text: impl Into<String>) -> ItemId {
        let id = ItemId::generate();
        self.upsert(Mutation::upsert(id.clone(), text, false));
        id
    }

    pub fn edit_text(&mut self, id: &ItemId, text: impl Into<String>) -> Result<(), AgentError> {
        let (_, completed) = self.current(id)?;
        self.upsert(Mutation::upsert(id.clone(), text, completed));
        Ok(())
    }

    pub fn set_completed(&mut self, id: &ItemId, completed: bool) -> Result<(), AgentError> {
        let (text, _) = self.current(id)?;
        self.upsert(Mutation::upsert(id.clone(), text, completed));
        Ok(())
    }

    /// Flip an item's completed flag and return the new value.
    pub fn toggle_completed(&mut self, id: &ItemId) -> Result<bool, AgentError> {
        let (text, completed) = self.current(id)?;
        self.upsert(Mutation::upsert(id.clone(), text, !completed));
        Ok(!completed)
    }

    pub fn delete(&mut self, id: &ItemId) -> Result<(), AgentError> {
        let (_, completed) = self.current(id)?;
        self.upsert(Mutation::delete(id.clone(), completed));
        Ok(())
    }

    /// Take pending edits as one batch, oldest first, and hold them as in
    /// flight until a snapshot shows them. Anything beyond the batch limit
    /// stays queued for the next flush.
    pub fn drain(&mut self) -> Option<MutationBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let take = self.pending.len().min(MAX_BATCH_LEN);
        let mutations: Vec<_> = self.pending.drain(..take).collect();
        debug!("Draining {} pending mutations", mutations.len());
        for mutation in &mutations {
            // A newer send of the same item supersedes the older one
            match self.in_flight.iter_mut().find(|m| m.id == mutation.id) {
                Some(existing) => *existing = mutation.clone(),
                None => self.in_flight.push(mutation.clone()),
            }
        }
        // Non-empty and within the limit by construction
        MutationBatch::new(mutations).ok()
    }

    /// Put back a batch that could not be sent. Items edited again since the
    /// batch was drained keep their newer pending edit.
    pub fn requeue(&mut self, batch: MutationBatch) {
        let mutations = batch.into_inner();
        self.in_flight
            .retain(|sent| !mutations.iter().any(|m| m.id == sent.id));
        self.restore(mutations);
    }

    /// Replace local data with a server snapshot, and settle the in-flight
    /// mutations it reflects.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let before = self.in_flight.len();
        self.in_flight.retain(|sent| !is_reflected(sent, &snapshot));
        let settled = before - self.in_flight.len();
        if settled > 0 {
            debug!("Snapshot settled {} in-flight mutations", settled);
        }
        self.data = Some(snapshot);
    }

    /// Transport dropped before the in-flight batch was answered. Mutations
    /// carry whole item state, so sending it again is harmless.
    pub fn connection_lost(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        self.restore(in_flight);
    }

    fn restore(&mut self, mutations: Vec<Mutation>) {
        let mut restored: Vec<Mutation> = mutations
            .into_iter()
            .filter(|m| !self.pending.iter().any(|p| p.id == m.id))
            .collect();
        if !restored.is_empty() {
            debug!("Requeued {} mutations", restored.len());
        }
        restored.append(&mut self.pending);
        self.pending = restored;
    }

    /// Current text and completed flag as the user sees them: the newest
    /// unacknowledged edit if there is one, otherwise the last snapshot.
    fn current(&self, id: &ItemId) -> Result<(String, bool), AgentError> {
        let unacknowledged = self
            .pending
            .iter()
            .find(|m| &m.id == id)
            .or_else(|| self.in_flight.iter().find(|m| &m.id == id));
        if let Some(pending) = unacknowledged {
            return match &pending.text {
                Some(text) => Ok((text.clone(), pending.completed)),
                None => Err(AgentError::UnknownItem(id.clone())),
            };
        }
        self.data
            .as_ref()
            .and_then(|snapshot| snapshot.item(id))
            .map(|item| (item.text.clone(), item.completed))
            .ok_or_else(|| AgentError::UnknownItem(id.clone()))
    }

    fn upsert(&mut self, mutation: Mutation) {
        match self.pending.iter_mut().find(|m| m.id == mutation.id) {
            Some(existing) => *existing = mutation,
            None => self.pending.push(mutation),
        }
    }
}

/// Whether `snapshot` shows the effect of `mutation`: the item gone for a
/// delete, or present with the same text and flag for an upsert.
fn is_reflected(mutation: &Mutation, snapshot: &Snapshot) -> bool {
    match (&mutation.text, snapshot.item(&mutation.id)) {
        (None, None) => true,
        (Some(text), Some(item)) => &item.text == text && item.completed == mutation.completed,
        _ => false,
    }
}
