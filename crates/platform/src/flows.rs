//! Data flow operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

pub struct ListFlows {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct ListFlowsArgs {
    limit: Option<u32>,
}

#[async_trait]
impl OperationHandler for ListFlows {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListFlowsArgs = parse_args(args)?;
        self.client
            .get("/flows", &[("limit", args.limit.unwrap_or(20).to_string())])
            .await
    }
}

pub struct ListFlowRuns {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct ListFlowRunsArgs {
    flow_id: String,
    limit: Option<u32>,
}

#[async_trait]
impl OperationHandler for ListFlowRuns {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListFlowRunsArgs = parse_args(args)?;
        self.client
            .get(
                &format!("/flows/{}/runs", args.flow_id),
                &[("limit", args.limit.unwrap_or(10).to_string())],
            )
            .await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    vec![
        Operation::new(
            "list_flows",
            "List configured data flows and their enabled state.",
            ParamSchema::empty().with(ParamSpec::optional(
                "limit",
                "Maximum number of results (default 20)",
                ParamKind::Integer,
            )),
            Arc::new(ListFlows {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "list_flow_runs",
            "List recent runs for one data flow, newest first.",
            ParamSchema::empty()
                .with(ParamSpec::required(
                    "flow_id",
                    "Flow identifier",
                    ParamKind::String,
                ))
                .with(ParamSpec::optional(
                    "limit",
                    "Maximum number of runs (default 10)",
                    ParamKind::Integer,
                )),
            Arc::new(ListFlowRuns {
                client: Arc::clone(client),
            }),
        ),
    ]
}
