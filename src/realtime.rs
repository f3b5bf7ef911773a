//! Change notifications and the debounced invalidate-then-refetch bridge.
//!
//! Writers publish a [`ChangeEvent`] after every successful write. Readers that
//! keep a derived snapshot (a document list, a milestone's signing status)
//! spawn a [`RefreshBridge`] with the filters they depend on; any matching
//! event schedules one full re-fetch after the debounce window. Event payloads
//! are never merged into the snapshot.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppResult;

const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Deals,
    Documents,
    DocumentVersions,
    DocumentSignatures,
    Milestones,
    Comments,
}

impl ChangeTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeTable::Deals => "deals",
            ChangeTable::Documents => "documents",
            ChangeTable::DocumentVersions => "document_versions",
            ChangeTable::DocumentSignatures => "document_signatures",
            ChangeTable::Milestones => "milestones",
            ChangeTable::Comments => "comments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub kind: ChangeKind,
    pub deal_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub record_id: Uuid,
}

impl ChangeEvent {
    pub fn new(table: ChangeTable, kind: ChangeKind, deal_id: Uuid, record_id: Uuid) -> Self {
        Self {
            table,
            kind,
            deal_id,
            milestone_id: None,
            record_id,
        }
    }

    pub fn with_milestone(mut self, milestone_id: Option<Uuid>) -> Self {
        self.milestone_id = milestone_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeScope {
    Deal(Uuid),
    Milestone(Uuid),
}

/// One subscription: a table plus an equality filter on its deal or milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: ChangeTable,
    pub scope: ChangeScope,
}

impl ChangeFilter {
    pub fn deal(table: ChangeTable, deal_id: Uuid) -> Self {
        Self {
            table,
            scope: ChangeScope::Deal(deal_id),
        }
    }

    pub fn milestone(table: ChangeTable, milestone_id: Uuid) -> Self {
        Self {
            table,
            scope: ChangeScope::Milestone(milestone_id),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        match self.scope {
            ChangeScope::Deal(deal_id) => event.deal_id == deal_id,
            ChangeScope::Milestone(milestone_id) => event.milestone_id == Some(milestone_id),
        }
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            ChangeScope::Deal(id) => write!(f, "{}:deal_id=eq.{id}", self.table.as_str()),
            ChangeScope::Milestone(id) => {
                write!(f, "{}:milestone_id=eq.{id}", self.table.as_str())
            }
        }
    }
}

/// In-process change bus. Delivery is at-least-once from the subscriber's
/// point of view: a lagging receiver is told to refetch rather than replayed.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ChangeEvent) {
        debug!(
            table = event.table.as_str(),
            kind = ?event.kind,
            deal_id = %event.deal_id,
            record_id = %event.record_id,
            "publishing change event"
        );
        // No subscribers is the common case and not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

pub struct RefreshBridge;

impl RefreshBridge {
    /// Fetches once, then re-fetches after every burst of matching events.
    /// Notifications arriving within `debounce` of the first one share a
    /// single fetch.
    pub fn spawn<T, F, Fut>(
        feed: &ChangeFeed,
        filters: Vec<ChangeFilter>,
        debounce: Duration,
        fetch: F,
    ) -> RefreshHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send,
    {
        // Subscribe before the first fetch so no change slips between them.
        let mut events = feed.subscribe();
        let (snapshots, receiver) = watch::channel(None);
        let trigger = Arc::new(Notify::new());
        let invalidations = trigger.clone();

        let task = tokio::spawn(async move {
            refetch(&fetch, &snapshots).await;

            loop {
                tokio::select! {
                    _ = invalidations.notified() => {}
                    _ = next_match(&mut events, &filters) => {}
                    _ = snapshots.closed() => break,
                }

                let window = tokio::time::sleep(debounce);
                tokio::pin!(window);
                loop {
                    tokio::select! {
                        _ = &mut window => break,
                        _ = invalidations.notified() => {}
                        _ = next_match(&mut events, &filters) => {}
                    }
                }

                refetch(&fetch, &snapshots).await;
            }
        });

        RefreshHandle {
            receiver,
            trigger,
            task,
        }
    }
}

async fn refetch<T, F, Fut>(fetch: &F, snapshots: &watch::Sender<Option<T>>)
where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match fetch().await {
        Ok(snapshot) => {
            snapshots.send_replace(Some(snapshot));
        }
        Err(err) => warn!(error = %err, "refresh fetch failed; keeping previous snapshot"),
    }
}

/// Resolves on the next event accepted by any filter.
async fn next_match(events: &mut broadcast::Receiver<ChangeEvent>, filters: &[ChangeFilter]) {
    loop {
        match events.recv().await {
            Ok(event) if filters.iter().any(|filter| filter.matches(&event)) => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "change subscriber lagged; forcing refetch");
                return;
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Owner of a running bridge. Dropping it stops the task and unsubscribes.
pub struct RefreshHandle<T> {
    receiver: watch::Receiver<Option<T>>,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<T: Clone> RefreshHandle<T> {
    pub fn latest(&self) -> Option<T> {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.receiver.clone()
    }

    /// Schedules a refetch as if a matching event had arrived.
    pub fn invalidate(&self) {
        self.trigger.notify_one();
    }
}

impl<T> Drop for RefreshHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
