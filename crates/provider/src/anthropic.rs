//! Anthropic Messages API adapter
//!
//! Structural quirks this adapter owns: the system instruction is a
//! top-level field (never an inline turn), the first message must be
//! user-authored, turns must strictly alternate, tools declare
//! `input_schema`, and tool invocations come back as `tool_use` content
//! blocks.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::{
    MergeRule, Provider, ProviderError, ProviderRequest, ProviderResponse, Result, Role,
    SystemStyle, ToolCall, TurnConstraints, Usage,
};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            default_model: default_model
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
        }
    }

    fn build_request(&self, request: &ProviderRequest) -> Value {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        // System turns never appear inline here; the builder hoists them and
        // hands us request.system. Anything that slipped through is dropped.
        let messages: Vec<Value> = request
            .turns
            .iter()
            .filter(|turn| turn.role != Role::System)
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!("filtered above"),
                };
                json!({ "role": role, "content": turn.content })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ProviderResponse> {
        let content = json["content"]
            .as_array()
            .ok_or(ProviderError::InvalidResponse)?;

        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls = Vec::new();

        for block in content {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        text_parts.push(text);
                    }
                }
                Some("tool_use") => {
                    // Absent input still yields a call with an empty mapping;
                    // the schema check reports the real problem later.
                    let arguments = match &block["input"] {
                        Value::Object(map) => Value::Object(map.clone()),
                        _ => json!({}),
                    };
                    tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments,
                    });
                }
                _ => {}
            }
        }

        let text = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        };

        let stop_reason = json["stop_reason"].as_str().unwrap_or("end_turn").to_string();

        let usage = if let Some(usage) = json["usage"].as_object() {
            let prompt = usage
                .get("input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let completion = usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        } else {
            Usage::default()
        };

        Ok(ProviderResponse {
            text,
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        trace!("messages request against {}", self.api_base);

        let url = format!("{}/v1/messages", self.api_base);
        let body = self.build_request(&request);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json: Value = response.json().await?;

        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }
            let error = json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(ProviderError::Api(error));
        }

        debug!(
            "messages response stop_reason={}",
            json["stop_reason"].as_str().unwrap_or("?")
        );

        self.parse_response(json)
    }

    fn constraints(&self) -> TurnConstraints {
        TurnConstraints {
            first_turn_must_be_user: true,
            strict_alternation: true,
            merge: MergeRule::KeepLast,
            system: SystemStyle::Standalone,
        }
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolSpec, Turn};
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test", None, None)
    }

    #[test]
    fn test_defaults() {
        let p = provider();
        assert_eq!(p.api_base, "https://api.anthropic.com");
        assert!(p.is_configured());
        assert!(!AnthropicProvider::new("", None, None).is_configured());
    }

    #[test]
    fn test_build_request_system_is_top_level() {
        let request = ProviderRequest {
            system: Some("You monitor a data platform.".to_string()),
            turns: vec![Turn::user("hello")],
            ..Default::default()
        };

        let body = provider().build_request(&request);
        assert_eq!(body["system"], "You monitor a data platform.");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_build_request_drops_inline_system_turns() {
        let request = ProviderRequest {
            turns: vec![
                Turn::system("stray system turn"),
                Turn::user("hello"),
                Turn::assistant("hi"),
            ],
            ..Default::default()
        };

        let body = provider().build_request(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_build_request_tools_use_input_schema() {
        let request = ProviderRequest {
            turns: vec![Turn::user("retry batch b-1")],
            tools: vec![ToolSpec::new(
                "retry_batch",
                "Re-run a failed batch",
                json!({
                    "type": "object",
                    "properties": { "batch_id": { "type": "string" } },
                    "required": ["batch_id"]
                }),
            )],
            ..Default::default()
        };

        let body = provider().build_request(&request);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools[0]["name"], "retry_batch");
        assert!(tools[0]["input_schema"]["properties"]["batch_id"].is_object());
        assert!(tools[0].get("function").is_none());
    }

    #[test]
    fn test_parse_response_text_blocks_joined() {
        let body = json!({
            "content": [
                { "type": "text", "text": "Checking batches." },
                { "type": "text", "text": "Two failed overnight." }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 30, "output_tokens": 12 }
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.text(), "Checking batches.\nTwo failed overnight.");
        assert_eq!(response.usage.total_tokens, 42);
    }

    #[test]
    fn test_parse_response_tool_use_block() {
        let body = json!({
            "content": [
                { "type": "text", "text": "Let me look that up." },
                {
                    "type": "tool_use",
                    "id": "toolu_01",
                    "name": "get_batch",
                    "input": { "batch_id": "b-42" }
                }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });

        let response = provider().parse_response(body).unwrap();
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].id, "toolu_01");
        assert_eq!(response.tool_calls[0].name, "get_batch");
        assert_eq!(response.tool_calls[0].arguments, json!({"batch_id": "b-42"}));
        assert_eq!(response.stop_reason, "tool_use");
    }

    #[test]
    fn test_parse_response_missing_input_becomes_empty_map() {
        let body = json!({
            "content": [
                { "type": "tool_use", "id": "toolu_02", "name": "list_flows" }
            ],
            "stop_reason": "tool_use"
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn test_parse_response_unknown_blocks_ignored() {
        let body = json!({
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "Done." }
            ],
            "stop_reason": "end_turn"
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.text(), "Done.");
        assert!(!response.has_tool_calls());
    }

    #[test]
    fn test_parse_response_without_content_is_invalid() {
        let result = provider().parse_response(json!({ "stop_reason": "end_turn" }));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let body = json!({
            "content": [
                { "type": "tool_use", "id": "a", "name": "x", "input": {} },
                { "type": "tool_use", "id": "b", "name": "y", "input": { "k": 1 } }
            ],
            "stop_reason": "tool_use"
        });

        let first = provider().parse_response(body.clone()).unwrap();
        let second = provider().parse_response(body).unwrap();
        assert_eq!(first.tool_calls, second.tool_calls);
    }

    #[test]
    fn test_constraints_are_strict() {
        let c = provider().constraints();
        assert!(c.first_turn_must_be_user);
        assert!(c.strict_alternation);
        assert_eq!(c.system, SystemStyle::Standalone);
    }
}
