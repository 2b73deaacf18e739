//! Batch ingestion operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

pub struct ListBatches {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct ListBatchesArgs {
    status: Option<String>,
    dataset_id: Option<String>,
    limit: Option<u32>,
}

#[async_trait]
impl OperationHandler for ListBatches {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListBatchesArgs = parse_args(args)?;
        let mut query = vec![("limit", args.limit.unwrap_or(20).to_string())];
        if let Some(status) = args.status {
            query.push(("status", status));
        }
        if let Some(dataset_id) = args.dataset_id {
            query.push(("dataset", dataset_id));
        }
        self.client.get("/catalog/batches", &query).await
    }
}

pub struct GetBatch {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct GetBatchArgs {
    batch_id: String,
}

#[async_trait]
impl OperationHandler for GetBatch {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetBatchArgs = parse_args(args)?;
        self.client
            .get(&format!("/catalog/batches/{}", args.batch_id), &[])
            .await
    }
}

pub struct RetryBatch {
    client: Arc<PlatformClient>,
}

#[async_trait]
impl OperationHandler for RetryBatch {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetBatchArgs = parse_args(args)?;
        self.client
            .post(
                &format!("/catalog/batches/{}/retry", args.batch_id),
                json!({}),
            )
            .await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    vec![
        Operation::new(
            "list_batches",
            "List recent ingestion batches, optionally filtered by status or dataset.",
            ParamSchema::empty()
                .with(ParamSpec::optional(
                    "status",
                    "Filter by batch status",
                    ParamKind::StringEnum(vec![
                        "success".to_string(),
                        "failed".to_string(),
                        "processing".to_string(),
                    ]),
                ))
                .with(ParamSpec::optional(
                    "dataset_id",
                    "Only batches for this dataset",
                    ParamKind::String,
                ))
                .with(ParamSpec::optional(
                    "limit",
                    "Maximum number of batches (default 20)",
                    ParamKind::Integer,
                )),
            Arc::new(ListBatches {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "get_batch",
            "Fetch one ingestion batch with its status and error details.",
            ParamSchema::empty().with(ParamSpec::required(
                "batch_id",
                "Batch identifier",
                ParamKind::String,
            )),
            Arc::new(GetBatch {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "retry_batch",
            "Re-run a failed ingestion batch. Re-processes the batch's source data.",
            ParamSchema::empty().with(ParamSpec::required(
                "batch_id",
                "Batch identifier to retry",
                ParamKind::String,
            )),
            Arc::new(RetryBatch {
                client: Arc::clone(client),
            }),
        )
        .with_approval(),
    ]
}
