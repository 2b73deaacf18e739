//! Turn normalization: stored history → provider request
//!
//! Vendors disagree about turn structure (leading role, alternation, where
//! the system instruction lives). This module is the one place that
//! reconciles a chronological history with those rules, as a pure
//! transformation. Stored history is never mutated to satisfy a vendor.

use tracing::debug;

use opsmate_provider::{
    MergeRule, ProviderRequest, Role, SystemStyle, Turn, TurnConstraints,
};

use crate::Message;

/// Default bounded window: most recent messages handed to the model
pub const DEFAULT_WINDOW: usize = 40;

/// Builds provider requests from history slices
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    window: usize,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Produce the turn sequence and system instruction for one request.
    ///
    /// In order: bounded-window truncation; hoist the most recent system
    /// message (which overrides `system_prompt` when present); strip leading
    /// non-user turns where the vendor demands a user-first sequence;
    /// collapse consecutive same-role runs where the vendor demands strict
    /// alternation; drop a trailing user turn; append the new user text.
    ///
    /// The result always ends in the new user turn, and under a strict
    /// vendor it strictly alternates user/assistant from a user start. Model
    /// selection, token limits and tool declarations are the caller's to
    /// fill in.
    pub fn build(
        &self,
        history: &[Message],
        new_user_text: &str,
        system_prompt: Option<&str>,
        constraints: &TurnConstraints,
    ) -> ProviderRequest {
        let start = history.len().saturating_sub(self.window);
        let recent = &history[start..];
        if start > 0 {
            debug!("window truncated {} earlier messages", start);
        }

        // A system message recorded mid-conversation is a conversation-scoped
        // override of the default instruction. Most recent wins; none of them
        // stay inline.
        let system_instruction = recent
            .iter()
            .rev()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .or_else(|| system_prompt.map(|s| s.to_string()));

        let mut turns: Vec<Turn> = recent
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        if constraints.first_turn_must_be_user {
            let lead = turns.iter().take_while(|t| t.role != Role::User).count();
            if lead > 0 {
                debug!("stripped {} leading non-user turns", lead);
                turns.drain(..lead);
            }
        }

        if constraints.strict_alternation {
            turns = collapse_runs(turns, constraints.merge);
        }

        // The new user text goes last; a trailing user turn would sit
        // directly next to it.
        if turns.last().map(|t| t.role) == Some(Role::User) {
            turns.pop();
        }

        turns.push(Turn::user(new_user_text));

        let mut request = ProviderRequest {
            turns,
            ..Default::default()
        };

        match (constraints.system, system_instruction) {
            (SystemStyle::Unsupported, Some(instruction)) => {
                // No system representation at all: fold it into the first
                // user turn rather than dropping it.
                let first = request
                    .turns
                    .iter_mut()
                    .find(|t| t.role == Role::User)
                    .expect("sequence always contains the new user turn");
                first.content = format!("{}\n\n{}", instruction, first.content);
            }
            (_, instruction) => request.system = instruction,
        }

        request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse each run of consecutive same-role turns to a single turn
fn collapse_runs(turns: Vec<Turn>, merge: MergeRule) -> Vec<Turn> {
    let mut collapsed: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match collapsed.last_mut() {
            Some(last) if last.role == turn.role => {
                if merge == MergeRule::KeepLast {
                    *last = turn;
                }
            }
            _ => collapsed.push(turn),
        }
    }
    collapsed
}
