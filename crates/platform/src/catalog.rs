//! The fixed operation catalog
//!
//! Built once at process start; the registry is read-only afterwards.

use std::sync::Arc;

use opsmate_registry::{Registry, Result};
use tracing::info;

use crate::{audiences, batches, datasets, flows, governance, queries, PlatformClient};

/// Register every platform operation against one authenticated client
pub fn build_catalog(client: Arc<PlatformClient>) -> Result<Registry> {
    let mut registry = Registry::new();

    for operation in batches::operations(&client)
        .into_iter()
        .chain(datasets::operations(&client))
        .chain(audiences::operations(&client))
        .chain(queries::operations(&client))
        .chain(flows::operations(&client))
        .chain(governance::operations(&client))
    {
        registry.register(operation)?;
    }

    info!("catalog ready with {} operations", registry.len());
    Ok(registry)
}
