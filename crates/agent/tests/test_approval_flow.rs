//! Approval gating through the full conversational loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use mockall::Sequence;
use serde_json::{json, Value};

use opsmate_agent::{AgentError, ChatAgent};
use opsmate_conversation::Role;
use opsmate_executor::Decision;
use opsmate_provider::{
    Provider, ProviderError, ProviderRequest, ProviderResponse, ToolCall, TurnConstraints, Usage,
};
use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamSchema, Registry,
};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
        fn constraints(&self) -> TurnConstraints;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl OperationHandler for CountingHandler {
    async fn call(&self, _args: Value) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"wiped": true}))
    }
}

struct EchoHandler;

#[async_trait]
impl OperationHandler for EchoHandler {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        Ok(json!({ "echoed": args["text"] }))
    }
}

fn registry_with_wipe() -> (Arc<Registry>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();
    registry
        .register(
            Operation::new(
                "wipe",
                "Remove all staged data for a dataset",
                ParamSchema::empty(),
                Arc::new(CountingHandler {
                    calls: Arc::clone(&calls),
                }),
            )
            .with_approval(),
        )
        .unwrap();
    registry
        .register(Operation::new(
            "echo",
            "Echo the given text back",
            ParamSchema::empty(),
            Arc::new(EchoHandler),
        ))
        .unwrap();
    (Arc::new(registry), calls)
}

fn wipe_call_response() -> ProviderResponse {
    ProviderResponse {
        text: Some("I'll clear the staged data.".to_string()),
        tool_calls: vec![ToolCall {
            id: "call_wipe".to_string(),
            name: "wipe".to_string(),
            arguments: json!({}),
        }],
        stop_reason: "tool_use".to_string(),
        usage: Usage::default(),
    }
}

fn mock_with_constraints() -> MockProvider {
    let mut mock = MockProvider::new();
    mock.expect_constraints()
        .returning(TurnConstraints::strictest);
    mock
}

#[tokio::test]
async fn test_flagged_operation_suspends_without_running() {
    let (registry, calls) = registry_with_wipe();

    let mut mock = mock_with_constraints();
    mock.expect_complete()
        .times(1)
        .returning(|_| Ok(wipe_call_response()));

    let agent = ChatAgent::new(mock, registry);
    let outcome = agent.converse(&[], "wipe the staging data").await.unwrap();

    let pending = outcome.pending_approval.expect("turn should suspend");
    assert_eq!(pending.operation, "wipe");
    assert!(!pending.request_id.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(outcome.final_text.contains("approval"));
    assert!(outcome.operations_used.is_empty());

    // The suspended answer is recorded with a pending-request marker.
    assert_eq!(outcome.new_messages.len(), 2);
    assert_eq!(
        outcome.new_messages[1].pending_request.as_deref(),
        Some(pending.request_id.as_str())
    );
}

#[tokio::test]
async fn test_approve_runs_handler_once_and_closes_turn() {
    let (registry, calls) = registry_with_wipe();

    let mut mock = mock_with_constraints();
    let mut seq = Sequence::new();

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(wipe_call_response()));

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|request| {
            let fold = &request.turns.last().unwrap().content;
            fold.contains("\"operation\":\"wipe\"") && fold.contains("\"status\":\"completed\"")
        })
        .returning(|_| Ok(ProviderResponse::from_text("Staged data cleared.")));

    let agent = ChatAgent::new(mock, registry);
    let outcome = agent.converse(&[], "wipe the staging data").await.unwrap();
    let request_id = outcome.pending_approval.unwrap().request_id;

    let resumed = agent.resolve(&request_id, Decision::Approve).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(resumed.final_text, "Staged data cleared.");
    assert_eq!(resumed.operations_used, vec!["wipe"]);
    assert!(resumed.pending_approval.is_none());

    // Only the closing answer is new; the user message was surfaced when
    // the turn suspended.
    assert_eq!(resumed.new_messages.len(), 1);
    assert_eq!(resumed.new_messages[0].role, Role::Assistant);

    // The turn resolved; a second decision has nothing to act on.
    let err = agent.resolve(&request_id, Decision::Approve).await.unwrap_err();
    assert!(matches!(err, AgentError::NoSuspendedTurn));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_never_runs_handler_and_notes_it() {
    let (registry, calls) = registry_with_wipe();

    let mut mock = mock_with_constraints();
    let mut seq = Sequence::new();

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(wipe_call_response()));

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|request| {
            request
                .turns
                .last()
                .unwrap()
                .content
                .contains("cancelled_by_user")
        })
        .returning(|_| Ok(ProviderResponse::from_text("Understood, leaving the data alone.")));

    let agent = ChatAgent::new(mock, registry);
    let outcome = agent.converse(&[], "wipe the staging data").await.unwrap();
    let request_id = outcome.pending_approval.unwrap().request_id;

    let resumed = agent.resolve(&request_id, Decision::Cancel).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(resumed.final_text.contains("leaving the data alone"));
    assert!(resumed.operations_used.is_empty());
}

#[tokio::test]
async fn test_sibling_requests_execute_while_one_waits() {
    let (registry, calls) = registry_with_wipe();

    let mut mock = mock_with_constraints();
    mock.expect_complete().times(1).returning(|_| {
        Ok(ProviderResponse {
            text: None,
            tool_calls: vec![
                ToolCall {
                    id: "call_echo".to_string(),
                    name: "echo".to_string(),
                    arguments: json!({"text": "side effect free"}),
                },
                ToolCall {
                    id: "call_wipe".to_string(),
                    name: "wipe".to_string(),
                    arguments: json!({}),
                },
            ],
            stop_reason: "tool_use".to_string(),
            usage: Usage::default(),
        })
    });

    let agent = ChatAgent::new(mock, registry);
    let outcome = agent
        .converse(&[], "echo something and wipe staging")
        .await
        .unwrap();

    // echo ran immediately; wipe is the only thing waiting.
    assert_eq!(outcome.operations_used, vec!["echo"]);
    assert_eq!(outcome.pending_approval.unwrap().operation, "wipe");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_with_wrong_id_keeps_turn_suspended() {
    let (registry, calls) = registry_with_wipe();

    let mut mock = mock_with_constraints();
    let mut seq = Sequence::new();

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(wipe_call_response()));

    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ProviderResponse::from_text("Cleared.")));

    let agent = ChatAgent::new(mock, registry);
    let outcome = agent.converse(&[], "wipe staging").await.unwrap();
    let request_id = outcome.pending_approval.unwrap().request_id;

    let err = agent.resolve("ghost-id", Decision::Approve).await.unwrap_err();
    assert!(matches!(err, AgentError::Executor(_)));

    // The real id still resolves afterwards.
    let resumed = agent.resolve(&request_id, Decision::Approve).await.unwrap();
    assert_eq!(resumed.final_text, "Cleared.");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resolve_without_suspended_turn() {
    let (registry, _) = registry_with_wipe();
    let agent = ChatAgent::new(mock_with_constraints(), registry);

    let err = agent.resolve("anything", Decision::Approve).await.unwrap_err();
    assert!(matches!(err, AgentError::NoSuspendedTurn));
}
