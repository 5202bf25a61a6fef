//! # Invocation Scheduler
//!
//! Decides whether a plan invocation is worth starting, where it runs, and
//! waits for it to finish.
//!
//! ```text
//! schedule(request, budget)
//!   │
//!   ├─ estimate_wcet(plan) > budget ──► Infeasible (nothing issued, nothing sent)
//!   │
//!   ├─ dispatch ── local target ──► PlanExecutor::start
//!   │           └─ remote target ─► CollaborationBus::send_request
//!   │
//!   └─ await_completion: every poll interval
//!        ├─ local: PlanExecutor::poll ──► CorrelationRegistry::resolve
//!        └─ CorrelationRegistry::state
//!             ├─ Completed ──► Completed / Failed outcome, entry retired
//!             ├─ Waiting   ──► sleep
//!             └─ Unknown   ──► Expired (evicted by retention)
//! ```
//!
//! Polling has no deadline of its own and never cancels remote work; the
//! retention window of the [`CorrelationRegistry`] is the only upper bound.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engines::{ExecutionStatus, PlanExecutor};
use super::errors::{SchedulerError, SchedulerResult};
use crate::messaging::CollaborationBus;
use crate::models::{
    CorrelationId, InvocationRequest, InvocationResponse, ParameterBinding, Plan, TimeBudget,
};
use crate::registry::{CorrelationRegistry, PendingState, PlanRegistry};

/// Final result of a scheduled invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed {
        correlation_id: CorrelationId,
        outputs: Vec<ParameterBinding>,
    },
    /// The executing instance reported a failure
    Failed {
        correlation_id: CorrelationId,
        reason: String,
    },
    /// The plan cannot finish within the budget and was not started
    Infeasible {
        estimated: Duration,
        budget: TimeBudget,
    },
}

impl InvocationOutcome {
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Completed { correlation_id, .. } | Self::Failed { correlation_id, .. } => {
                Some(correlation_id)
            }
            Self::Infeasible { .. } => None,
        }
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote,
}

/// An invocation that was handed to its executor and is now pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub correlation_id: CorrelationId,
    pub route: Route,
}

/// Handle of an invocation scheduled on its own task
#[derive(Debug)]
pub struct InvocationTask {
    handle: JoinHandle<SchedulerResult<InvocationOutcome>>,
}

impl InvocationTask {
    /// Stop waiting for the invocation; work already dispatched keeps running
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> SchedulerResult<InvocationOutcome> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Cancelled),
        }
    }
}

#[derive(Clone)]
pub struct InvocationScheduler {
    plans: Arc<PlanRegistry>,
    correlations: Arc<CorrelationRegistry>,
    bus: Arc<CollaborationBus>,
    executor: Arc<dyn PlanExecutor>,
    poll_interval: Duration,
}

impl fmt::Debug for InvocationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationScheduler")
            .field("bus", &self.bus)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl InvocationScheduler {
    pub fn new(
        plans: Arc<PlanRegistry>,
        correlations: Arc<CorrelationRegistry>,
        bus: Arc<CollaborationBus>,
        executor: Arc<dyn PlanExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            plans,
            correlations,
            bus,
            executor,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// How long an uncollected invocation is kept around
    pub fn retention(&self) -> Duration {
        self.correlations.retention()
    }

    fn lookup_plan(&self, request: &InvocationRequest) -> SchedulerResult<Plan> {
        self.plans
            .plan(&request.package_id, &request.plan)
            .ok_or_else(|| SchedulerError::plan_not_found(&request.package_id, &request.plan))
    }

    /// Check the budget, dispatch, and wait for the final response
    pub async fn schedule(
        &self,
        request: InvocationRequest,
        budget: Option<TimeBudget>,
    ) -> SchedulerResult<InvocationOutcome> {
        let plan = self.lookup_plan(&request)?;

        if let Some(budget) = budget {
            let estimated = self.plans.estimate_wcet(&plan);
            if !budget.admits(estimated) {
                info!(
                    plan = %plan.id,
                    estimated_ms = estimated.as_millis() as u64,
                    budget = %budget,
                    "Plan cannot complete within the available time, not invoking"
                );
                return Ok(InvocationOutcome::Infeasible { estimated, budget });
            }
            debug!(
                plan = %plan.id,
                estimated_ms = estimated.as_millis() as u64,
                budget = %budget,
                "Plan fits into the available time"
            );
        }

        let dispatched = self.dispatch_plan(request, &plan).await?;
        self.await_completion(dispatched).await
    }

    /// Run [`Self::schedule`] on its own task
    pub fn spawn(&self, request: InvocationRequest, budget: Option<TimeBudget>) -> InvocationTask {
        let scheduler = self.clone();
        InvocationTask {
            handle: tokio::spawn(async move { scheduler.schedule(request, budget).await }),
        }
    }

    /// Register the invocation as pending and hand it to its executor
    pub async fn dispatch(&self, request: InvocationRequest) -> SchedulerResult<Dispatched> {
        let plan = self.lookup_plan(&request)?;
        self.dispatch_plan(request, &plan).await
    }

    async fn dispatch_plan(
        &self,
        request: InvocationRequest,
        plan: &Plan,
    ) -> SchedulerResult<Dispatched> {
        let route = if self.bus.is_local(&request.target_instance) {
            Route::Local
        } else {
            Route::Remote
        };
        self.dispatch_via(request, plan, route).await
    }

    async fn dispatch_via(
        &self,
        mut request: InvocationRequest,
        plan: &Plan,
        route: Route,
    ) -> SchedulerResult<Dispatched> {
        if request.correlation_id.as_str().is_empty() {
            request.correlation_id = self.correlations.issue();
        } else {
            self.correlations
                .register(request.correlation_id.clone())
                .map_err(|e| SchedulerError::dispatch(&request.correlation_id, e))?;
        }
        let correlation_id = request.correlation_id.clone();

        match route {
            Route::Local => {
                if let Err(e) = self.executor.start(&request, plan).await {
                    self.correlations.retire(&correlation_id);
                    return Err(SchedulerError::dispatch(&correlation_id, e));
                }
            }
            Route::Remote => {
                let target = request.target_instance.clone();
                if let Err(e) = self.bus.send_request(request).await {
                    self.correlations.retire(&correlation_id);
                    return Err(SchedulerError::undeliverable(&correlation_id, e));
                }
                debug!(correlation_id = %correlation_id, target = %target, "Invocation sent to peer");
            }
        }

        info!(
            correlation_id = %correlation_id,
            plan = %plan.id,
            route = ?route,
            "Plan invocation dispatched"
        );

        Ok(Dispatched {
            correlation_id,
            route,
        })
    }

    /// Poll until the dispatched invocation has a final response
    pub async fn await_completion(
        &self,
        dispatched: Dispatched,
    ) -> SchedulerResult<InvocationOutcome> {
        let correlation_id = dispatched.correlation_id;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if dispatched.route == Route::Local {
                let response = match self.executor.poll(&correlation_id).await {
                    ExecutionStatus::Running => None,
                    ExecutionStatus::Finished(outputs) => {
                        Some(InvocationResponse::completed(correlation_id.clone(), outputs))
                    }
                    ExecutionStatus::Failed(reason) => {
                        Some(InvocationResponse::failed(correlation_id.clone(), reason))
                    }
                };
                if let Some(response) = response {
                    self.correlations.resolve(response);
                }
            }

            match self.correlations.state(&correlation_id) {
                PendingState::Waiting => {
                    debug!(correlation_id = %correlation_id, "Invocation still running");
                }
                PendingState::Completed(_) => {
                    let response = self
                        .correlations
                        .take_completed(&correlation_id)
                        .ok_or_else(|| SchedulerError::Expired {
                            correlation_id: correlation_id.clone(),
                        })?;
                    return Ok(Self::outcome(response));
                }
                PendingState::Unknown => {
                    warn!(correlation_id = %correlation_id, "Pending invocation expired");
                    return Err(SchedulerError::Expired { correlation_id });
                }
            }
        }
    }

    fn outcome(response: InvocationResponse) -> InvocationOutcome {
        match response.failure {
            Some(reason) => InvocationOutcome::Failed {
                correlation_id: response.correlation_id,
                reason,
            },
            None => InvocationOutcome::Completed {
                correlation_id: response.correlation_id,
                outputs: response.outputs,
            },
        }
    }

    /// Run a request received from a peer on this instance.
    ///
    /// The origin's correlation id is kept so the response can be matched on
    /// the other side.
    pub async fn execute_locally(&self, request: InvocationRequest) -> InvocationResponse {
        let correlation_id = request.correlation_id.clone();

        let plan = match self.lookup_plan(&request) {
            Ok(plan) => plan,
            Err(e) => return InvocationResponse::failed(correlation_id, e.to_string()),
        };

        let result = match self.dispatch_via(request, &plan, Route::Local).await {
            Ok(dispatched) => self.await_completion(dispatched).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(InvocationOutcome::Completed { outputs, .. }) => {
                InvocationResponse::completed(correlation_id, outputs)
            }
            Ok(InvocationOutcome::Failed { reason, .. }) => {
                InvocationResponse::failed(correlation_id, reason)
            }
            Ok(InvocationOutcome::Infeasible { .. }) => {
                InvocationResponse::failed(correlation_id, "plan not feasible")
            }
            Err(e) => InvocationResponse::failed(correlation_id, e.to_string()),
        }
    }
}
