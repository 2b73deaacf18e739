//! Segment and identity operations

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use opsmate_registry::{
    Operation, OperationError, OperationHandler, ParamKind, ParamSchema, ParamSpec,
};

use crate::{parse_args, PlatformClient};

pub struct ListSegments {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct ListSegmentsArgs {
    limit: Option<u32>,
}

#[async_trait]
impl OperationHandler for ListSegments {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: ListSegmentsArgs = parse_args(args)?;
        self.client
            .get(
                "/segments",
                &[("limit", args.limit.unwrap_or(20).to_string())],
            )
            .await
    }
}

pub struct GetSegment {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct GetSegmentArgs {
    segment_id: String,
}

#[async_trait]
impl OperationHandler for GetSegment {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: GetSegmentArgs = parse_args(args)?;
        self.client
            .get(&format!("/segments/{}", args.segment_id), &[])
            .await
    }
}

pub struct LookupIdentity {
    client: Arc<PlatformClient>,
}

#[derive(Deserialize)]
struct LookupIdentityArgs {
    namespace: String,
    id_value: String,
}

#[async_trait]
impl OperationHandler for LookupIdentity {
    async fn call(&self, args: Value) -> Result<Value, OperationError> {
        let args: LookupIdentityArgs = parse_args(args)?;
        self.client
            .get(
                "/identities/lookup",
                &[
                    ("namespace", args.namespace),
                    ("id", args.id_value),
                ],
            )
            .await
    }
}

pub fn operations(client: &Arc<PlatformClient>) -> Vec<Operation> {
    vec![
        Operation::new(
            "list_segments",
            "List audience segment definitions.",
            ParamSchema::empty().with(ParamSpec::optional(
                "limit",
                "Maximum number of results (default 20)",
                ParamKind::Integer,
            )),
            Arc::new(ListSegments {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "get_segment",
            "Fetch one segment definition with its evaluation status.",
            ParamSchema::empty().with(ParamSpec::required(
                "segment_id",
                "Segment identifier",
                ParamKind::String,
            )),
            Arc::new(GetSegment {
                client: Arc::clone(client),
            }),
        ),
        Operation::new(
            "lookup_identity",
            "Resolve an identity value in a namespace to its linked identity graph.",
            ParamSchema::empty()
                .with(ParamSpec::required(
                    "namespace",
                    "Identity namespace, e.g. email or crm_id",
                    ParamKind::String,
                ))
                .with(ParamSpec::required(
                    "id_value",
                    "Identity value to resolve",
                    ParamKind::String,
                )),
            Arc::new(LookupIdentity {
                client: Arc::clone(client),
            }),
        ),
    ]
}
