//! Approval-gated operation execution
//!
//! Takes the operation requests parsed out of one model turn and runs them
//! against the registry: immediately for ordinary operations, after an
//! explicit human decision for flagged ones. Failures are isolated per
//! request; the report order always matches the input order, whatever order
//! things actually finished in.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use opsmate_provider::ToolCall;
use opsmate_registry::{Operation, OperationError, Registry};

/// A model-proposed invocation bound for execution
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Unique within the turn; minted locally when the vendor omitted one
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Turn that produced this request
    pub turn_id: String,
}

impl OperationRequest {
    pub fn from_tool_call(call: ToolCall, turn_id: impl Into<String>) -> Self {
        let id = if call.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            call.id
        };
        Self {
            id,
            name: call.name,
            arguments: call.arguments,
            turn_id: turn_id.into(),
        }
    }
}

/// Lifecycle of one request inside the executor.
///
/// `Pending → Approved → Executing → Completed | Failed`, or
/// `Pending → Cancelled`. Requests on operations without the approval flag
/// skip the first two states. The executor's pending table tracks the
/// pre-terminal states; terminal outcomes are reported as
/// [`ExecutionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Why a request failed
#[derive(Error, Debug)]
pub enum ExecutionFailure {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl ExecutionFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionFailure::UnknownOperation(_) => "unknown_operation",
            ExecutionFailure::Operation(err) => err.kind(),
        }
    }
}

/// Outcome of one request
#[derive(Debug)]
pub enum ExecutionStatus {
    Completed(Value),
    Failed(ExecutionFailure),
    PendingApproval,
    Cancelled,
}

/// One entry of the caller-facing report, in input order
#[derive(Debug)]
pub struct ExecutionReport {
    pub request_id: String,
    pub operation: String,
    pub status: ExecutionStatus,
}

impl ExecutionReport {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, ExecutionStatus::PendingApproval)
    }

    /// JSON form folded into the follow-up model turn
    pub fn to_fold_value(&self) -> Value {
        match &self.status {
            ExecutionStatus::Completed(result) => json!({
                "operation": self.operation,
                "request_id": self.request_id,
                "status": "completed",
                "result": result,
            }),
            ExecutionStatus::Failed(failure) => json!({
                "operation": self.operation,
                "request_id": self.request_id,
                "status": "failed",
                "error_kind": failure.kind(),
                "error": failure.to_string(),
            }),
            ExecutionStatus::PendingApproval => json!({
                "operation": self.operation,
                "request_id": self.request_id,
                "status": "pending_approval",
            }),
            ExecutionStatus::Cancelled => json!({
                "operation": self.operation,
                "request_id": self.request_id,
                "status": "cancelled_by_user",
            }),
        }
    }
}

/// What the approval surface shows a human before deciding
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub request_id: String,
    pub operation: String,
    pub arguments: Value,
    pub description: String,
}

/// Human decision on one pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Cancel,
}

/// Executor errors (the per-request failures live in the reports instead)
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("no pending request with id {0}")]
    UnknownRequest(String),

    #[error("request {0} already has a decision")]
    AlreadyDecided(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

struct ParkedRequest {
    request: OperationRequest,
    operation: Arc<Operation>,
    state: ApprovalState,
}

/// Runs operation requests against the registry, gating flagged operations
/// on human approval
pub struct Executor {
    registry: Arc<Registry>,
    parked: Mutex<HashMap<String, ParkedRequest>>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a batch of requests from one model turn.
    ///
    /// Non-approval requests run concurrently; an individual failure never
    /// suppresses its siblings. Approval-flagged requests are parked as
    /// `PendingApproval` without their handler ever running. Reports come
    /// back in input order.
    pub async fn execute(&self, requests: Vec<OperationRequest>) -> Vec<ExecutionReport> {
        debug!("executing batch of {} requests", requests.len());

        let mut reports: Vec<Option<ExecutionReport>> =
            (0..requests.len()).map(|_| None).collect();
        let mut running: JoinSet<(usize, ExecutionReport)> = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let operation = match self.registry.get(&request.name) {
                Some(operation) => operation,
                None => {
                    warn!("model requested unknown operation: {}", request.name);
                    reports[index] = Some(ExecutionReport {
                        request_id: request.id,
                        operation: request.name.clone(),
                        status: ExecutionStatus::Failed(ExecutionFailure::UnknownOperation(
                            request.name,
                        )),
                    });
                    continue;
                }
            };

            if operation.requires_approval() {
                debug!(
                    "parking {} ({}) for approval",
                    request.name, request.id
                );
                reports[index] = Some(ExecutionReport {
                    request_id: request.id.clone(),
                    operation: request.name.clone(),
                    status: ExecutionStatus::PendingApproval,
                });
                self.parked.lock().await.insert(
                    request.id.clone(),
                    ParkedRequest {
                        request,
                        operation,
                        state: ApprovalState::Pending,
                    },
                );
                continue;
            }

            running.spawn(async move {
                (index, run_operation(&operation, &request).await)
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(err) => warn!("execution task panicked: {}", err),
            }
        }

        // A panicked task leaves a hole; surface it as a failure rather than
        // dropping the slot.
        reports
            .into_iter()
            .map(|entry| {
                entry.unwrap_or(ExecutionReport {
                    request_id: String::new(),
                    operation: String::new(),
                    status: ExecutionStatus::Failed(ExecutionFailure::Operation(
                        OperationError::upstream("operation task aborted"),
                    )),
                })
            })
            .collect()
    }

    /// Requests currently awaiting a human decision, in a stable order
    pub async fn pending(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<PendingApproval> = self
            .parked
            .lock()
            .await
            .values()
            .filter(|parked| parked.state == ApprovalState::Pending)
            .map(|parked| PendingApproval {
                request_id: parked.request.id.clone(),
                operation: parked.request.name.clone(),
                arguments: parked.request.arguments.clone(),
                description: parked.operation.description().to_string(),
            })
            .collect();
        pending.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        pending
    }

    /// Apply a human decision to a parked request.
    ///
    /// Approval runs the handler exactly once; cancellation discards the
    /// request without ever running it. The claim happens under the table
    /// lock, so a second decision on the same id fails even while the first
    /// one's handler is still in flight.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> Result<ExecutionReport> {
        let (operation, request) = {
            let mut table = self.parked.lock().await;
            let parked = table
                .get_mut(request_id)
                .ok_or_else(|| ExecutorError::UnknownRequest(request_id.to_string()))?;

            if parked.state != ApprovalState::Pending {
                return Err(ExecutorError::AlreadyDecided(request_id.to_string()));
            }

            match decision {
                Decision::Cancel => {
                    let parked = table.remove(request_id).expect("present under lock");
                    debug!("cancelled request {}", request_id);
                    return Ok(ExecutionReport {
                        request_id: parked.request.id,
                        operation: parked.request.name,
                        status: ExecutionStatus::Cancelled,
                    });
                }
                Decision::Approve => {
                    parked.state = ApprovalState::Approved;
                    debug!("approved request {}", request_id);
                    (Arc::clone(&parked.operation), parked.request.clone())
                }
            }
        };

        let report = run_operation(&operation, &request).await;
        self.parked.lock().await.remove(request_id);
        Ok(report)
    }
}

/// Validate and run one resolved operation, capturing failure as data
async fn run_operation(operation: &Operation, request: &OperationRequest) -> ExecutionReport {
    if let Err(validation) = operation.schema().validate(&request.arguments) {
        return ExecutionReport {
            request_id: request.id.clone(),
            operation: request.name.clone(),
            status: ExecutionStatus::Failed(validation.into()),
        };
    }

    match operation
        .handler()
        .call(request.arguments.clone())
        .await
    {
        Ok(result) => ExecutionReport {
            request_id: request.id.clone(),
            operation: request.name.clone(),
            status: ExecutionStatus::Completed(result),
        },
        Err(err) => {
            warn!("operation {} failed: {}", request.name, err);
            ExecutionReport {
                request_id: request.id.clone(),
                operation: request.name.clone(),
                status: ExecutionStatus::Failed(err.into()),
            }
        }
    }
}
