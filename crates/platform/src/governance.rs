//! Policy evaluation and audit operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

pub struct EvaluatePolicy {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct EvaluatePolicyArgs {
    dataset_id: String,
    marketing_action: String,
}

#[async_trait]
impl OperationHandler for EvaluatePolicy {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: EvaluatePolicyArgs = parse_args(args)?;
        self.client
            .post(
                "/policies/evaluate",
                json!({
                    "datasetId": args.dataset_id,
                    "marketingAction": args.marketing_action,
                }),
            )
            .await
    }
}

pub struct SearchAuditEvents {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct SearchAuditEventsArgs {
    resource_type: Option<String>,
    since: Option<String>,
    limit: Option<u32>,
}

#[async_trait]
impl OperationHandler for SearchAuditEvents {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: SearchAuditEventsArgs = parse_args(args)?;
        let mut query = vec![("limit", args.limit.unwrap_or(50).to_string())];
        if let Some(resource_type) = args.resource_type {
            query.push(("resourceType", resource_type));
        }
        if let Some(since) = args.since {
            query.push(("since", since));
        }
        self.client.get("/audit/events", &query).await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    vec![
        Operation::new(
            "evaluate_policy",
            "Check whether a marketing action on a dataset violates any usage policy.",
            ParamSchema::empty()
                .with(ParamSpec::required(
                    "dataset_id",
                    "Dataset the action applies to",
                    ParamKind::String,
                ))
                .with(ParamSpec::required(
                    "marketing_action",
                    "Marketing action name to evaluate",
                    ParamKind::String,
                )),
            Arc::new(EvaluatePolicy {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "search_audit_events",
            "Search the platform audit log for recent administrative events.",
            ParamSchema::empty()
                .with(ParamSpec::optional(
                    "resource_type",
                    "Restrict to one resource type, e.g. dataset or segment",
                    ParamKind::String,
                ))
                .with(ParamSpec::optional(
                    "since",
                    "ISO-8601 lower bound on event time",
                    ParamKind::String,
                ))
                .with(ParamSpec::optional(
                    "limit",
                    "Maximum number of events (default 50)",
                    ParamKind::Integer,
                )),
            Arc::new(SearchAuditEvents {
                client: Arc::clone(client),
            }),
        ),
    ]
}
