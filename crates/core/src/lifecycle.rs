use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, QueryGateway, QueryResult, Row};
use crate::history::{HistoryEntry, HistoryLog};
use crate::validation::{validate_sql, SyntaxRule};

pub const NOT_READY_MESSAGE: &str = "SQL engine not ready.";
pub const SUPERSEDED_MESSAGE: &str = "Query cancelled: superseded by a newer request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Results,
    History,
}

impl ViewMode {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Results => Self::History,
            Self::History => Self::Results,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LifecycleState {
    pub phase: Phase,
    pub results: Vec<Row>,
    pub execution_time_ms: Option<f64>,
    pub error: Option<String>,
    pub history: HistoryLog,
    pub view_mode: ViewMode,
    pub active_request: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    ExecuteRequested {
        request: RequestId,
    },
    QuerySucceeded {
        rows: Vec<Row>,
        execution_time_ms: f64,
    },
    QueryFailed {
        message: String,
        execution_time_ms: Option<f64>,
    },
    HistoryAppended(HistoryEntry),
    ToggleView,
}

impl LifecycleState {
    #[must_use]
    pub fn reduce(mut self, event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::ExecuteRequested { request } => {
                self.phase = Phase::Executing;
                self.error = None;
                self.execution_time_ms = None;
                self.active_request = Some(request);
            }
            LifecycleEvent::QuerySucceeded {
                rows,
                execution_time_ms,
            } => {
                self.phase = Phase::Idle;
                self.results = rows;
                self.execution_time_ms = Some(execution_time_ms);
                self.error = None;
                self.view_mode = ViewMode::Results;
                self.active_request = None;
            }
            LifecycleEvent::QueryFailed {
                message,
                execution_time_ms,
            } => {
                self.phase = Phase::Idle;
                self.error = Some(message);
                self.results = Vec::new();
                self.execution_time_ms = execution_time_ms;
                self.active_request = None;
            }
            LifecycleEvent::HistoryAppended(entry) => self.history.push(entry),
            LifecycleEvent::ToggleView => self.view_mode = self.view_mode.toggled(),
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionTicket {
    pub id: RequestId,
    pub query: String,
    pub cancellation: CancellationToken,
    started_at: Instant,
}

impl ExecutionTicket {
    fn new(id: RequestId, query: &str) -> Self {
        Self {
            id,
            query: query.to_string(),
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalRejection {
    #[error("SQL engine not ready.")]
    NotReady,
    #[error("{message}")]
    Validation {
        message: String,
        violations: Vec<SyntaxRule>,
    },
}

#[derive(Debug, Clone)]
pub enum Submission {
    Dispatched(ExecutionTicket),
    Rejected(LocalRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Superseded,
}

#[derive(Debug, Default)]
pub struct QueryLifecycleController {
    state: LifecycleState,
    in_flight: Option<ExecutionTicket>,
    next_request: u64,
    attempted: bool,
}

impl QueryLifecycleController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state.phase == Phase::Executing
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&ExecutionTicket> {
        self.in_flight.as_ref()
    }

    pub fn toggle_view(&mut self) {
        self.apply(LifecycleEvent::ToggleView);
    }

    /// Every attempt supersedes the request in flight, including one that is
    /// then rejected locally. A dispatched ticket must be finished with
    /// [`QueryLifecycleController::complete`].
    pub fn submit(&mut self, ready: bool, query: &str) -> Submission {
        self.attempted = true;
        self.supersede_in_flight();

        if !ready {
            return self.reject(query, LocalRejection::NotReady);
        }

        let validation = validate_sql(query);
        if let Some(message) = validation.message() {
            return self.reject(
                query,
                LocalRejection::Validation {
                    message,
                    violations: validation.violations,
                },
            );
        }

        self.next_request += 1;
        let ticket = ExecutionTicket::new(RequestId(self.next_request), query);
        info!(request = ticket.id.get(), query, "dispatching query");
        self.apply(LifecycleEvent::ExecuteRequested { request: ticket.id });
        self.in_flight = Some(ticket.clone());
        Submission::Dispatched(ticket)
    }

    pub fn complete(
        &mut self,
        request: RequestId,
        outcome: Result<QueryResult, GatewayError>,
    ) -> Disposition {
        if self.in_flight.as_ref().map(|ticket| ticket.id) != Some(request) {
            debug!(request = request.get(), "dropping outcome of superseded request");
            return Disposition::Superseded;
        }
        let Some(ticket) = self.in_flight.take() else {
            return Disposition::Superseded;
        };

        match outcome {
            Ok(result) if result.success => {
                let execution_time_ms = result
                    .execution_time_ms
                    .unwrap_or_else(|| ticket.elapsed_ms());
                info!(
                    request = request.get(),
                    rows = result.rows.len(),
                    execution_time_ms,
                    "query succeeded"
                );
                self.apply(LifecycleEvent::QuerySucceeded {
                    rows: result.rows,
                    execution_time_ms,
                });
                self.apply(LifecycleEvent::HistoryAppended(HistoryEntry::succeeded(
                    ticket.query,
                    execution_time_ms,
                )));
            }
            Ok(result) => {
                let message = result
                    .message
                    .unwrap_or_else(|| "Query failed".to_string());
                warn!(request = request.get(), %message, "gateway rejected query");
                self.fail(ticket.query, message, result.execution_time_ms);
            }
            Err(error) => {
                let message = format!("Error executing query: {error}");
                warn!(request = request.get(), %message, "gateway call failed");
                self.fail(ticket.query, message, None);
            }
        }
        Disposition::Applied
    }

    pub async fn execute<G: QueryGateway + ?Sized>(
        &mut self,
        gateway: &G,
        ready: bool,
        query: &str,
    ) -> Result<Disposition, LocalRejection> {
        let ticket = match self.submit(ready, query) {
            Submission::Dispatched(ticket) => ticket,
            Submission::Rejected(rejection) => return Err(rejection),
        };
        let outcome = gateway.execute_query(&ticket.query).await;
        Ok(self.complete(ticket.id, outcome))
    }

    #[must_use]
    pub fn auto_run_pending(&self, ready: bool) -> bool {
        ready && !self.attempted && self.state.history.is_empty()
    }

    fn supersede_in_flight(&mut self) {
        let Some(previous) = self.in_flight.take() else {
            return;
        };
        previous.cancellation.cancel();
        warn!(request = previous.id.get(), "superseding in-flight query");
        let elapsed_ms = previous.elapsed_ms();
        self.apply(LifecycleEvent::HistoryAppended(HistoryEntry::failed(
            previous.query,
            elapsed_ms,
            SUPERSEDED_MESSAGE,
        )));
    }

    fn reject(&mut self, query: &str, rejection: LocalRejection) -> Submission {
        warn!(%rejection, "query rejected before dispatch");
        self.fail(query.to_string(), rejection.to_string(), None);
        Submission::Rejected(rejection)
    }

    fn fail(&mut self, query: String, message: String, execution_time_ms: Option<f64>) {
        self.apply(LifecycleEvent::QueryFailed {
            message: message.clone(),
            execution_time_ms,
        });
        self.apply(LifecycleEvent::HistoryAppended(HistoryEntry::failed(
            query,
            execution_time_ms.unwrap_or(0.0),
            message,
        )));
    }

    fn apply(&mut self, event: LifecycleEvent) {
        self.state = std::mem::take(&mut self.state).reduce(event);
    }
}
