use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::errors::StateMachineResult;
use super::operations::DeploymentOperation;
use super::states::DeploymentState;
use crate::constants::system::{MAX_REMOVED_HISTORIES, MAX_TRANSITIONS_PER_PACKAGE};
use crate::models::PackageId;

/// Single recorded state change of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTransition {
    pub from_state: Option<DeploymentState>,
    /// `None` when the deployment state was removed
    pub to_state: Option<DeploymentState>,
    /// `None` for administrative (forced) transitions
    pub operation: Option<DeploymentOperation>,
    pub occurred_at: DateTime<Utc>,
}

impl DeploymentTransition {
    fn new(
        from_state: Option<DeploymentState>,
        to_state: Option<DeploymentState>,
        operation: Option<DeploymentOperation>,
    ) -> Self {
        Self {
            from_state,
            to_state,
            operation,
            occurred_at: Utc::now(),
        }
    }
}

/// Storage of the deployment-process state per package.
///
/// Every method must be atomic per package id; no ordering across packages is
/// required.
#[async_trait]
pub trait DeploymentStateStore: Send + Sync + 'static {
    /// Resolve the current state of a package
    async fn current_state(&self, package_id: &PackageId)
        -> StateMachineResult<Option<DeploymentState>>;

    /// Replace the state with `next` only if it currently equals `expected`.
    ///
    /// Returns `false` without mutating anything when the current state differs.
    async fn compare_and_set(
        &self,
        package_id: &PackageId,
        expected: Option<DeploymentState>,
        next: DeploymentState,
        operation: Option<DeploymentOperation>,
    ) -> StateMachineResult<bool>;

    /// Store a state unconditionally
    async fn force_state(
        &self,
        package_id: &PackageId,
        state: DeploymentState,
    ) -> StateMachineResult<()>;

    /// Drop the state of a package, returning what was stored
    async fn remove(
        &self,
        package_id: &PackageId,
        operation: Option<DeploymentOperation>,
    ) -> StateMachineResult<Option<DeploymentState>>;

    /// Recorded transitions of a package, oldest first
    async fn transitions(&self, package_id: &PackageId)
        -> StateMachineResult<Vec<DeploymentTransition>>;
}

/// Process-local state store backed by `DashMap` entries.
///
/// Each package keeps at most `max_transitions` history entries. Histories of
/// removed packages stay readable until `max_removed` newer removals push them
/// out.
#[derive(Debug)]
pub struct InMemoryDeploymentStateStore {
    states: DashMap<PackageId, DeploymentState>,
    history: DashMap<PackageId, VecDeque<DeploymentTransition>>,
    removed: Mutex<VecDeque<PackageId>>,
    max_transitions: usize,
    max_removed: usize,
}

impl Default for InMemoryDeploymentStateStore {
    fn default() -> Self {
        Self::with_limits(MAX_TRANSITIONS_PER_PACKAGE, MAX_REMOVED_HISTORIES)
    }
}

impl InMemoryDeploymentStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_transitions: usize, max_removed: usize) -> Self {
        Self {
            states: DashMap::new(),
            history: DashMap::new(),
            removed: Mutex::new(VecDeque::new()),
            max_transitions: max_transitions.max(1),
            max_removed,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Packages with a recorded history, live or removed
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn record(&self, package_id: &PackageId, transition: DeploymentTransition) {
        let mut history = self.history.entry(package_id.clone()).or_default();
        if history.len() == self.max_transitions {
            history.pop_front();
        }
        history.push_back(transition);
    }

    /// Keep the history of a removed package until enough newer removals happen
    fn retire_history(&self, package_id: &PackageId) {
        let mut removed = self.removed.lock();
        removed.retain(|id| id != package_id);
        removed.push_back(package_id.clone());
        while removed.len() > self.max_removed {
            if let Some(evicted) = removed.pop_front() {
                // A package stored again since keeps its history
                if !self.states.contains_key(&evicted) {
                    self.history.remove(&evicted);
                }
            }
        }
    }
}

#[async_trait]
impl DeploymentStateStore for InMemoryDeploymentStateStore {
    async fn current_state(
        &self,
        package_id: &PackageId,
    ) -> StateMachineResult<Option<DeploymentState>> {
        Ok(self.states.get(package_id).map(|s| *s))
    }

    async fn compare_and_set(
        &self,
        package_id: &PackageId,
        expected: Option<DeploymentState>,
        next: DeploymentState,
        operation: Option<DeploymentOperation>,
    ) -> StateMachineResult<bool> {
        // The entry guard is held while recording so history order matches state order
        match self.states.entry(package_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if expected != Some(current) {
                    return Ok(false);
                }
                occupied.insert(next);
                self.record(
                    package_id,
                    DeploymentTransition::new(Some(current), Some(next), operation),
                );
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(next);
                self.record(
                    package_id,
                    DeploymentTransition::new(None, Some(next), operation),
                );
                Ok(true)
            }
        }
    }

    async fn force_state(
        &self,
        package_id: &PackageId,
        state: DeploymentState,
    ) -> StateMachineResult<()> {
        let previous = self.states.insert(package_id.clone(), state);
        self.record(
            package_id,
            DeploymentTransition::new(previous, Some(state), None),
        );
        Ok(())
    }

    async fn remove(
        &self,
        package_id: &PackageId,
        operation: Option<DeploymentOperation>,
    ) -> StateMachineResult<Option<DeploymentState>> {
        let removed = self.states.remove(package_id).map(|(_, state)| state);
        if removed.is_some() {
            self.record(
                package_id,
                DeploymentTransition::new(removed, None, operation),
            );
            self.retire_history(package_id);
        }
        Ok(removed)
    }

    async fn transitions(
        &self,
        package_id: &PackageId,
    ) -> StateMachineResult<Vec<DeploymentTransition>> {
        Ok(self
            .history
            .get(package_id)
            .map(|h| h.value().iter().cloned().collect())
            .unwrap_or_default())
    }
}
