//! System prompt assembly

use chrono::Local;

use opsmate_registry::Registry;

/// Build the standing instruction for the dashboard assistant.
///
/// Rebuilt per turn so the timestamp stays current. The operation list comes
/// from the registry's handler-free specs; descriptions double as the
/// model-facing documentation.
pub fn system_prompt(registry: &Registry) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M (%A)");

    let mut capabilities = String::new();
    for spec in registry.list() {
        capabilities.push_str("- ");
        capabilities.push_str(&spec.name);
        if spec.requires_approval {
            capabilities.push_str(" (requires operator approval)");
        }
        capabilities.push_str(": ");
        capabilities.push_str(&spec.description);
        capabilities.push('\n');
    }

    format!(
        r#"# opsmate

You are opsmate, the operations assistant built into a data-platform
monitoring dashboard. Operators ask you about ingestion batches, datasets,
schemas, segments, identities, queries, data flows, governance policies and
audit history; you answer by invoking the platform operations declared below
and explaining the results in plain language.

## Current Time
{}

## Available operations
{}
Operations marked as requiring operator approval will pause until the
operator confirms them in the dashboard; request them normally when they are
the right action. When an operation fails, explain the failure and suggest a
next step. Keep answers concise and concrete: identifiers, counts and
statuses over generalities. Never invent platform data you did not fetch."#,
        now, capabilities
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use opsmate_registry::{Operation, OperationError, OperationHandler, ParamSchema};

    struct NoopHandler;

    #[async_trait]
    impl OperationHandler for NoopHandler {
        async fn call(&self, _args: Value) -> Result<Value, OperationError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_prompt_lists_operations_with_approval_marker() {
        let mut registry = Registry::new();
        registry
            .register(Operation::new(
                "list_batches",
                "List recent ingestion batches.",
                ParamSchema::empty(),
                Arc::new(NoopHandler),
            ))
            .unwrap();
        registry
            .register(
                Operation::new(
                    "retry_batch",
                    "Re-run a failed batch.",
                    ParamSchema::empty(),
                    Arc::new(NoopHandler),
                )
                .with_approval(),
            )
            .unwrap();

        let prompt = system_prompt(&registry);

        assert!(prompt.contains("opsmate"));
        assert!(prompt.contains("Current Time"));
        assert!(prompt.contains("- list_batches: List recent ingestion batches."));
        assert!(prompt
            .contains("- retry_batch (requires operator approval): Re-run a failed batch."));
    }

    #[test]
    fn test_prompt_with_empty_registry_still_renders() {
        let prompt = system_prompt(&Registry::new());
        assert!(prompt.contains("Available operations"));
    }
}
