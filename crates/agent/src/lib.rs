//! Conversational orchestration for the monitoring dashboard
//!
//! Ties the other crates together: build a provider request from history,
//! let the model propose operations, execute them through the approval gate,
//! fold results back, and hand the dashboard a final answer, a pending
//! approval, or an explicit error. Never a silent no-op.

use thiserror::Error;

pub mod chat;
pub mod prompt;

pub use chat::{AgentOptions, ChatAgent, TurnOutcome};

/// Turn-level errors. Per-operation failures never show up here; they are
/// folded into the answer as data.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Executor(#[from] opsmate_executor::ExecutorError),

    #[error("no turn is awaiting approval")]
    NoSuspendedTurn,
}

pub type Result<T> = std::result::Result<T, AgentError>;
