//! # Correlation Registry
//!
//! Tracks invocations that were dispatched but whose final response has not
//! been collected yet. Each pending invocation is keyed by a correlation id
//! that is unique among all live entries.
//!
//! Lifecycle of an entry:
//!
//! ```text
//! issue()/register() ─► Waiting ─resolve(partial)─► Waiting
//!                           │
//!                           └─resolve(terminal)─► Completed ─take_completed()─► retired
//!
//! any state ──(older than retention)──► evicted
//! ```
//!
//! Responses for ids that are unknown, already retired, or already completed
//! are reported as [`ResolveOutcome::Stale`] and change nothing.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{RegistryError, RegistryResult};
use crate::models::{CorrelationId, InvocationResponse};

/// What happened to a response handed to [`CorrelationRegistry::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The response completed its pending invocation
    Completed,
    /// A partial response was recorded; the invocation keeps waiting
    Progress,
    /// No live, incomplete invocation matched; the response was dropped
    Stale,
}

/// Observable state of a correlation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    Waiting,
    Completed(InvocationResponse),
    /// Never issued, already collected, or evicted
    Unknown,
}

#[derive(Debug)]
struct PendingInvocation {
    registered_at: Instant,
    latest: Option<InvocationResponse>,
    completed: bool,
}

impl PendingInvocation {
    fn new() -> Self {
        Self {
            registered_at: Instant::now(),
            latest: None,
            completed: false,
        }
    }
}

#[derive(Debug)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingInvocation>,
    retention: Duration,
}

impl CorrelationRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            retention,
        }
    }

    /// Issue a fresh id and register it as pending
    pub fn issue(&self) -> CorrelationId {
        loop {
            let id = CorrelationId::generate();
            if let Entry::Vacant(vacant) = self.pending.entry(id.clone()) {
                vacant.insert(PendingInvocation::new());
                return id;
            }
        }
    }

    /// Register a caller-supplied id; rejected while the same id is still live
    pub fn register(&self, id: CorrelationId) -> RegistryResult<()> {
        match self.pending.entry(id) {
            Entry::Occupied(occupied) => {
                Err(RegistryError::DuplicateCorrelation(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingInvocation::new());
                Ok(())
            }
        }
    }

    /// Match a response to its pending invocation
    pub fn resolve(&self, response: InvocationResponse) -> ResolveOutcome {
        let Some(mut entry) = self.pending.get_mut(&response.correlation_id) else {
            debug!(correlation_id = %response.correlation_id, "Dropping response for unknown correlation id");
            return ResolveOutcome::Stale;
        };

        if entry.completed {
            debug!(correlation_id = %response.correlation_id, "Dropping duplicate response");
            return ResolveOutcome::Stale;
        }

        let terminal = response.is_terminal();
        entry.latest = Some(response);
        if terminal {
            entry.completed = true;
            ResolveOutcome::Completed
        } else {
            ResolveOutcome::Progress
        }
    }

    pub fn state(&self, id: &CorrelationId) -> PendingState {
        match self.pending.get(id) {
            Some(entry) if entry.completed => match &entry.latest {
                Some(response) => PendingState::Completed(response.clone()),
                None => PendingState::Waiting,
            },
            Some(_) => PendingState::Waiting,
            None => PendingState::Unknown,
        }
    }

    /// Remove and return the final response once the invocation completed
    pub fn take_completed(&self, id: &CorrelationId) -> Option<InvocationResponse> {
        self.pending
            .remove_if(id, |_, pending| pending.completed)
            .and_then(|(_, pending)| pending.latest)
    }

    /// Latest partial response, if any arrived
    pub fn latest(&self, id: &CorrelationId) -> Option<InvocationResponse> {
        self.pending.get(id).and_then(|entry| entry.latest.clone())
    }

    /// Drop an entry regardless of its state; true if it was live
    pub fn retire(&self, id: &CorrelationId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Evict every entry registered more than the retention window before `now`
    pub fn evict_expired_at(&self, now: Instant) -> Vec<CorrelationId> {
        let mut evicted = Vec::new();
        self.pending.retain(|id, pending| {
            let keep = now.saturating_duration_since(pending.registered_at) < self.retention;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });

        if !evicted.is_empty() {
            warn!(
                count = evicted.len(),
                retention_secs = self.retention.as_secs(),
                "Evicted abandoned pending invocations"
            );
        }
        evicted
    }

    pub fn evict_expired(&self) -> Vec<CorrelationId> {
        self.evict_expired_at(Instant::now())
    }

    /// Periodically evict expired entries until the handle is aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Starting correlation reaper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.evict_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterBinding;
    use proptest::prelude::*;

    fn registry() -> CorrelationRegistry {
        CorrelationRegistry::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_partial_then_final_response() {
        let registry = registry();
        let id = registry.issue();

        assert_eq!(
            registry.resolve(InvocationResponse::in_progress(id.clone())),
            ResolveOutcome::Progress
        );
        assert_eq!(registry.state(&id), PendingState::Waiting);

        let done = InvocationResponse::completed(id.clone(), vec![ParameterBinding::new("ip", "10.0.0.1")]);
        assert_eq!(registry.resolve(done.clone()), ResolveOutcome::Completed);
        assert_eq!(registry.state(&id), PendingState::Completed(done.clone()));

        assert_eq!(registry.take_completed(&id), Some(done));
        assert_eq!(registry.state(&id), PendingState::Unknown);
    }

    #[test]
    fn test_duplicate_and_late_responses_are_stale() {
        let registry = registry();
        let id = registry.issue();
        let done = InvocationResponse::completed(id.clone(), Vec::new());

        assert_eq!(registry.resolve(done.clone()), ResolveOutcome::Completed);
        assert_eq!(registry.resolve(done.clone()), ResolveOutcome::Stale);

        registry.take_completed(&id);
        assert_eq!(registry.resolve(done), ResolveOutcome::Stale);
    }

    #[test]
    fn test_take_completed_leaves_waiting_entries() {
        let registry = registry();
        let id = registry.issue();
        assert_eq!(registry.take_completed(&id), None);
        assert!(registry.is_pending(&id));
    }

    #[test]
    fn test_register_rejects_live_duplicate_but_allows_reuse_after_retire() {
        let registry = registry();
        let id = CorrelationId::new("caller-chosen");

        registry.register(id.clone()).unwrap();
        assert_eq!(
            registry.register(id.clone()),
            Err(RegistryError::DuplicateCorrelation(id.clone()))
        );

        assert!(registry.retire(&id));
        assert!(registry.register(id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_older_than_retention_are_evicted() {
        let registry = CorrelationRegistry::new(Duration::from_secs(60));
        let old = registry.issue();
        tokio::time::advance(Duration::from_secs(45)).await;
        let young = registry.issue();
        tokio::time::advance(Duration::from_secs(20)).await;

        let evicted = registry.evict_expired();
        assert_eq!(evicted, vec![old.clone()]);
        assert!(!registry.is_pending(&old));
        assert!(registry.is_pending(&young));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_in_background() {
        let registry = Arc::new(CorrelationRegistry::new(Duration::from_secs(10)));
        let id = registry.issue();
        let reaper = registry.spawn_reaper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(!registry.is_pending(&id));

        reaper.abort();
    }

    proptest! {
        #[test]
        fn prop_issued_ids_are_unique(count in 1usize..200) {
            let registry = registry();
            let ids: std::collections::HashSet<_> = (0..count).map(|_| registry.issue()).collect();
            prop_assert_eq!(ids.len(), count);
            prop_assert_eq!(registry.len(), count);
        }
    }
}
