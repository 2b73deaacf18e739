//! Dataset and schema registry operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

#[derive(Deserialize)]
struct ListArgs {
    limit: Option<u32>,
}

pub struct ListDatasets {
    client: Arc<PlatformClient>,
}

#[async_trait]
impl OperationHandler for ListDatasets {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListArgs = parse_args(args)?;
        self.client
            .get(
                "/catalog/datasets",
                &[("limit", args.limit.unwrap_or(20).to_string())],
            )
            .await
    }
}

pub struct GetDataset {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct GetDatasetArgs {
    dataset_id: String,
}

#[async_trait]
impl OperationHandler for GetDataset {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetDatasetArgs = parse_args(args)?;
        self.client
            .get(&format!("/catalog/datasets/{}", args.dataset_id), &[])
            .await
    }
}

pub struct CreateDataset {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct CreateDatasetArgs {
    name: String,
    schema_id: String,
}

#[async_trait]
impl OperationHandler for CreateDataset {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: CreateDatasetArgs = parse_args(args)?;
        self.client
            .post(
                "/catalog/datasets",
                json!({ "name": args.name, "schemaRef": args.schema_id }),
            )
            .await
    }
}

pub struct ListSchemas {
    client: Arc<PlatformClient>,
}

#[async_trait]
impl OperationHandler for ListSchemas {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListArgs = parse_args(args)?;
        self.client
            .get(
                "/schemas",
                &[("limit", args.limit.unwrap_or(20).to_string())],
            )
            .await
    }
}

pub struct GetSchema {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct GetSchemaArgs {
    schema_id: String,
}

#[async_trait]
impl OperationHandler for GetSchema {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetSchemaArgs = parse_args(args)?;
        self.client
            .get(&format!("/schemas/{}", args.schema_id), &[])
            .await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    let limit_param = || {
        ParamSpec::optional(
            "limit",
            "Maximum number of results (default 20)",
            ParamKind::Integer,
        )
    };

    vec![
        Operation::new(
            "list_datasets",
            "List datasets registered in the catalog.",
            ParamSchema::empty().with(limit_param()),
            Arc::new(ListDatasets {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "get_dataset",
            "Fetch one dataset with its schema reference and ingestion state.",
            ParamSchema::empty().with(ParamSpec::required(
                "dataset_id",
                "Dataset identifier",
                ParamKind::String,
            )),
            Arc::new(GetDataset {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "create_dataset",
            "Create a new dataset bound to an existing schema.",
            ParamSchema::empty()
                .with(ParamSpec::required(
                    "name",
                    "Display name for the dataset",
                    ParamKind::String,
                ))
                .with(ParamSpec::required(
                    "schema_id",
                    "Schema the dataset conforms to",
                    ParamKind::String,
                )),
            Arc::new(CreateDataset {
                client: Arc::clone(client),
            }),
        )
        .with_approval(),
        Operation::new(
            "list_schemas",
            "List schemas in the registry.",
            ParamSchema::empty().with(limit_param()),
            Arc::new(ListSchemas {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "get_schema",
            "Fetch one schema definition with its field groups.",
            ParamSchema::empty().with(ParamSpec::required(
                "schema_id",
                "Schema identifier",
                ParamKind::String,
            )),
            Arc::new(GetSchema {
                client: Arc::clone(client),
            }),
        ),
    ]
}
