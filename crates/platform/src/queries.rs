//! Query service operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

pub struct SubmitQuery {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct SubmitQueryArgs {
    sql: String,
    description: Option<String>,
}

#[async_trait]
impl OperationHandler for SubmitQuery {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: SubmitQueryArgs = parse_args(args)?;
        let mut body = json!({ "sql": args.sql });
        if let Some(description) = args.description {
            body["description"] = json!(description);
        }
        self.client.post("/queries", body).await
    }
}

pub struct GetQueryStatus {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct GetQueryStatusArgs {
    query_id: String,
}

#[async_trait]
impl OperationHandler for GetQueryStatus {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetQueryStatusArgs = parse_args(args)?;
        self.client
            .get(&format!("/queries/{}", args.query_id), &[])
            .await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    vec![
        Operation::new(
            "submit_query",
            "Submit a SQL query against the platform's data lake. The query runs with the operator's permissions.",
            ParamSchema::empty()
                .with(ParamSpec::required(
                    "sql",
                    "SQL text to execute",
                    ParamKind::String,
                ))
                .with(ParamSpec::optional(
                    "description",
                    "Human-readable label for the query run",
                    ParamKind::String,
                )),
            Arc::new(SubmitQuery {
                client: Arc::clone(client),
            }),
        )
        .with_approval(),
        Operation::new(
            "get_query_status",
            "Check the state and result location of a submitted query.",
            ParamSchema::empty().with(ParamSpec::required(
                "query_id",
                "Query run identifier",
                ParamKind::String,
            )),
            Arc::new(GetQueryStatus {
                client: Arc::clone(client),
            }),
        ),
    ]
}
