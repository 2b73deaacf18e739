//! The per-turn orchestration loop
//!
//! One `converse` call handles one user turn: build the provider request,
//! let the model propose operations, run them through the approval gate,
//! fold the results into a synthetic tool-result turn, and re-prompt for the
//! closing answer. A turn suspended on approval is resumed through
//! `resolve`, never through another `converse`.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use opsmate_config::AgentDefaults;
use opsmate_conversation::{Message, RequestBuilder};
use opsmate_executor::{
    Decision, ExecutionReport, ExecutionStatus, Executor, OperationRequest, PendingApproval,
};
use opsmate_provider::{Provider, ProviderRequest, ProviderResponse, ToolSpec, Turn};
use opsmate_registry::Registry;

use crate::prompt;
use crate::{AgentError, Result};

/// Turn-fatal provider failure message. History stays untouched so the
/// operator can simply ask again.
const PROVIDER_DOWN: &str =
    "Sorry, I couldn't reach the language model just now. Please try again in a moment.";

/// Agent tunables, mirroring the config crate's defaults
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Empty string means the provider's default model
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub history_window: usize,
    /// How many execute-and-re-prompt rounds one user turn may take
    pub followup_rounds: u32,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.2,
            history_window: 40,
            followup_rounds: 1,
        }
    }
}

impl From<&AgentDefaults> for AgentOptions {
    fn from(defaults: &AgentDefaults) -> Self {
        Self {
            model: String::new(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            history_window: defaults.history_window,
            followup_rounds: defaults.followup_rounds,
        }
    }
}

/// What one user turn produced
#[derive(Debug)]
pub struct TurnOutcome {
    pub final_text: String,
    /// Raw operation results, for dashboard panels that render more than
    /// prose
    pub structured_data: Option<Value>,
    /// Operations whose handlers were actually attempted, in request order
    pub operations_used: Vec<String>,
    /// Set when the turn is suspended on a human decision
    pub pending_approval: Option<PendingApproval>,
    /// Messages for the caller to append to durable history
    pub new_messages: Vec<Message>,
}

/// A turn parked on a pending approval, waiting for `resolve`
struct SuspendedTurn {
    user_text: String,
    history: Vec<Message>,
    assistant_text: String,
    reports: Vec<ExecutionReport>,
}

/// Provider-agnostic conversational agent over one operation registry
pub struct ChatAgent<P: Provider> {
    provider: Arc<P>,
    registry: Arc<Registry>,
    executor: Executor,
    builder: RequestBuilder,
    options: AgentOptions,
    suspended: Mutex<Option<SuspendedTurn>>,
}

impl<P: Provider> ChatAgent<P> {
    pub fn new(provider: P, registry: Arc<Registry>) -> Self {
        Self::with_options(provider, registry, AgentOptions::default())
    }

    pub fn with_options(provider: P, registry: Arc<Registry>, options: AgentOptions) -> Self {
        let executor = Executor::new(Arc::clone(&registry));
        let builder = RequestBuilder::new().with_window(options.history_window);
        Self {
            provider: Arc::new(provider),
            registry,
            executor,
            builder,
            options,
            suspended: Mutex::new(None),
        }
    }

    /// Requests currently awaiting an operator decision
    pub async fn pending(&self) -> Vec<PendingApproval> {
        self.executor.pending().await
    }

    /// Process one user turn against a bounded slice of prior history.
    ///
    /// Returns a final answer, or a pending-approval outcome when a flagged
    /// operation needs the operator first. Provider failure is reported as
    /// an explicit message with `new_messages` left empty, so durable
    /// history is unchanged and the turn can be retried.
    pub async fn converse(&self, history: &[Message], user_text: &str) -> Result<TurnOutcome> {
        let turn_id = Uuid::new_v4().to_string();
        info!("turn {} started", turn_id);

        let mut request = self.base_request(history, user_text);

        let mut response = match self.provider.complete(request.clone()).await {
            Ok(response) => response,
            Err(err) => {
                error!("provider call failed: {}", err);
                return Ok(provider_down_outcome(Vec::new()));
            }
        };

        let mut reports: Vec<ExecutionReport> = Vec::new();
        let mut rounds = 0;

        loop {
            if !response.has_tool_calls() {
                break;
            }
            if rounds >= self.options.followup_rounds {
                warn!("follow-up budget exhausted with tool calls outstanding");
                break;
            }

            let requests: Vec<OperationRequest> = response
                .tool_calls
                .iter()
                .cloned()
                .map(|call| OperationRequest::from_tool_call(call, &turn_id))
                .collect();
            debug!("round {}: executing {} requests", rounds, requests.len());

            let batch = self.executor.execute(requests).await;

            if batch.iter().any(|report| report.is_pending()) {
                reports.extend(batch);
                return Ok(self
                    .suspend(history, user_text, &response, reports)
                    .await);
            }

            request.turns.push(assistant_turn(&response));
            request.turns.push(fold_turn(&batch));
            reports.extend(batch);
            rounds += 1;

            response = match self.provider.complete(request.clone()).await {
                Ok(response) => response,
                Err(err) => {
                    error!("follow-up provider call failed: {}", err);
                    return Ok(provider_down_outcome(reports));
                }
            };
        }

        Ok(finish(Some(user_text), &response, reports))
    }

    /// Resume a suspended turn with an operator decision.
    ///
    /// Approval executes the parked handler exactly once; cancellation
    /// discards it. Either way the remaining results are folded and the
    /// model is asked for the closing answer, with the cancellation noted
    /// when there was one.
    pub async fn resolve(&self, request_id: &str, decision: Decision) -> Result<TurnOutcome> {
        let mut suspended = {
            let mut slot = self.suspended.lock().await;
            slot.take().ok_or(AgentError::NoSuspendedTurn)?
        };

        let resolved = match self.executor.resolve(request_id, decision).await {
            Ok(report) => report,
            Err(err) => {
                // Unknown or already-decided id: the turn stays suspended.
                *self.suspended.lock().await = Some(suspended);
                return Err(err.into());
            }
        };

        info!("request {} resolved: {:?}", request_id, decision);

        match suspended
            .reports
            .iter_mut()
            .find(|report| report.request_id == request_id)
        {
            Some(slot) => *slot = resolved,
            None => suspended.reports.push(resolved),
        }

        // A batch can park more than one request; surface the next one
        // instead of finishing early.
        if let Some(next_id) = suspended
            .reports
            .iter()
            .find(|report| report.is_pending())
            .map(|report| report.request_id.clone())
        {
            if let Some(pending) = self
                .executor
                .pending()
                .await
                .into_iter()
                .find(|p| p.request_id == next_id)
            {
                let final_text = approval_prompt(&pending);
                let operations_used = executed_names(&suspended.reports);
                *self.suspended.lock().await = Some(suspended);
                return Ok(TurnOutcome {
                    new_messages: vec![Message::assistant(&final_text)
                        .with_pending_request(&pending.request_id)],
                    final_text,
                    structured_data: None,
                    operations_used,
                    pending_approval: Some(pending),
                });
            }
        }

        let mut request = self.base_request(&suspended.history, &suspended.user_text);
        request.turns.push(Turn::assistant(suspended.assistant_text.clone()));
        request.turns.push(fold_turn(&suspended.reports));

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                error!("closing provider call failed: {}", err);
                return Ok(provider_down_outcome(suspended.reports));
            }
        };

        // The user message was already surfaced when the turn suspended;
        // only the closing answer is new.
        Ok(finish(None, &response, suspended.reports))
    }

    /// Normalized history plus system prompt, model parameters and the
    /// advertised operation catalog
    fn base_request(&self, history: &[Message], user_text: &str) -> ProviderRequest {
        let system = prompt::system_prompt(&self.registry);
        let mut request =
            self.builder
                .build(history, user_text, Some(&system), &self.provider.constraints());

        request.model = self.options.model.clone();
        request.max_tokens = self.options.max_tokens;
        request.temperature = self.options.temperature;
        request.tools = self
            .registry
            .list()
            .into_iter()
            .map(|spec| ToolSpec::new(spec.name, spec.description, spec.parameters))
            .collect();

        request
    }

    /// Park the turn on its first pending request and tell the operator
    async fn suspend(
        &self,
        history: &[Message],
        user_text: &str,
        response: &ProviderResponse,
        reports: Vec<ExecutionReport>,
    ) -> TurnOutcome {
        let first_pending_id = reports
            .iter()
            .find(|report| report.is_pending())
            .map(|report| report.request_id.clone())
            .expect("suspend called with a pending report");

        let pending = self
            .executor
            .pending()
            .await
            .into_iter()
            .find(|p| p.request_id == first_pending_id)
            .expect("pending report is parked in the executor");

        let final_text = approval_prompt(&pending);
        let operations_used = executed_names(&reports);

        *self.suspended.lock().await = Some(SuspendedTurn {
            user_text: user_text.to_string(),
            history: history.to_vec(),
            assistant_text: assistant_turn(response).content,
            reports,
        });

        TurnOutcome {
            new_messages: vec![
                Message::user(user_text),
                Message::assistant(&final_text).with_pending_request(&pending.request_id),
            ],
            final_text,
            structured_data: None,
            operations_used,
            pending_approval: Some(pending),
        }
    }
}

/// Assistant turn carried into the fold; the model's own words when it said
/// any, a placeholder otherwise
fn assistant_turn(response: &ProviderResponse) -> Turn {
    let text = response.text();
    if text.is_empty() {
        Turn::assistant("Invoking platform operations.")
    } else {
        Turn::assistant(text)
    }
}

/// Synthetic tool-result turn: every report of the batch as structured data
/// the model can explain
fn fold_turn(reports: &[ExecutionReport]) -> Turn {
    let folded: Vec<Value> = reports.iter().map(|r| r.to_fold_value()).collect();
    Turn::user(json!({ "operation_results": folded }).to_string())
}

fn approval_prompt(pending: &PendingApproval) -> String {
    format!(
        "The operation '{}' ({}) needs operator approval before I run it. Approve or cancel it in the dashboard to continue.",
        pending.operation, pending.description
    )
}

/// Operations whose handlers were attempted (completed or failed)
fn executed_names(reports: &[ExecutionReport]) -> Vec<String> {
    reports
        .iter()
        .filter(|report| {
            matches!(
                report.status,
                ExecutionStatus::Completed(_) | ExecutionStatus::Failed(_)
            )
        })
        .map(|report| report.operation.clone())
        .collect()
}

fn structured_payload(reports: &[ExecutionReport]) -> Option<Value> {
    if reports.is_empty() {
        return None;
    }
    let folded: Vec<Value> = reports.iter().map(|r| r.to_fold_value()).collect();
    Some(json!({ "operations": folded }))
}

/// Final outcome for a turn that reached a closing answer
fn finish(
    user_text: Option<&str>,
    response: &ProviderResponse,
    reports: Vec<ExecutionReport>,
) -> TurnOutcome {
    let final_text = if response.text().is_empty() {
        "Done. The requested operations completed.".to_string()
    } else {
        response.text().to_string()
    };

    let structured_data = structured_payload(&reports);
    let operations_used = executed_names(&reports);

    let mut assistant = Message::assistant(&final_text);
    if let Some(data) = &structured_data {
        assistant = assistant.with_structured_data(data.clone());
    }

    let mut new_messages = Vec::new();
    if let Some(user_text) = user_text {
        new_messages.push(Message::user(user_text));
    }
    new_messages.push(assistant);

    TurnOutcome {
        final_text,
        structured_data,
        operations_used,
        pending_approval: None,
        new_messages,
    }
}

/// Turn-fatal outcome: explicit apology, durable history untouched
fn provider_down_outcome(reports: Vec<ExecutionReport>) -> TurnOutcome {
    TurnOutcome {
        final_text: PROVIDER_DOWN.to_string(),
        structured_data: structured_payload(&reports),
        operations_used: executed_names(&reports),
        pending_approval: None,
        new_messages: Vec::new(),
    }
}
