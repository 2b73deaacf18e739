//! OpenAI-compatible chat-completions adapter
//!
//! Speaks the `/chat/completions` wire format, which also covers OpenRouter
//! and most self-hosted gateways.

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::{
    MergeRule, Provider, ProviderError, ProviderRequest, ProviderResponse, Result, Role,
    SystemStyle, ToolCall, TurnConstraints, Usage,
};

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let is_openrouter = api_key.starts_with("sk-or-")
            || api_base
                .as_ref()
                .map(|b| b.contains("openrouter"))
                .unwrap_or(false);

        let api_base = api_base.unwrap_or_else(|| {
            if is_openrouter {
                "https://openrouter.ai/api/v1".to_string()
            } else {
                "https://api.openai.com/v1".to_string()
            }
        });

        let default_model = default_model.unwrap_or_else(|| "gpt-4o".to_string());

        Self {
            client: Client::new(),
            api_key,
            api_base,
            default_model,
        }
    }

    fn build_request(&self, request: &ProviderRequest) -> Value {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut messages: Vec<Value> = Vec::with_capacity(request.turns.len() + 1);

        // This wire format takes the system instruction as a leading
        // system-role message.
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }

        for turn in &request.turns {
            let role = match turn.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.content }));
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();

            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ProviderResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let message = &choice["message"];
        let text = message["content"].as_str().map(|s| s.to_string());
        let stop_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];

                // Arguments arrive as a JSON string; tolerate raw objects and
                // absent fields. A call with unusable arguments still parses,
                // with an empty mapping, so schema validation can report it.
                let arguments = match &function["arguments"] {
                    Value::String(s) => {
                        serde_json::from_str(s).unwrap_or_else(|_| json!({}))
                    }
                    Value::Object(map) => Value::Object(map.clone()),
                    _ => json!({}),
                };

                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: function["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                });
            }
        }

        let usage = if let Some(usage) = json["usage"].as_object() {
            Usage {
                prompt_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                total_tokens: usage
                    .get("total_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
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
impl Provider for OpenAiProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        trace!("chat completion against {}", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&request);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            "chat completion returned {} tool calls",
            json["choices"][0]["message"]["tool_calls"]
                .as_array()
                .map(|v| v.len())
                .unwrap_or(0)
        );

        self.parse_response(json)
    }

    fn constraints(&self) -> TurnConstraints {
        TurnConstraints {
            first_turn_must_be_user: false,
            strict_alternation: false,
            merge: MergeRule::KeepLast,
            system: SystemStyle::Inline,
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

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("sk-test", None, None)
    }

    #[test]
    fn test_new_with_openrouter_key() {
        let p = OpenAiProvider::new("sk-or-test123", None, None);
        assert_eq!(p.api_base, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_new_with_openai_key() {
        let p = provider();
        assert_eq!(p.api_base, "https://api.openai.com/v1");
        assert_eq!(p.default_model, "gpt-4o");
    }

    #[test]
    fn test_new_with_custom_base_and_model() {
        let p = OpenAiProvider::new(
            "key",
            Some("https://llm.internal/v1".to_string()),
            Some("ops-tuned".to_string()),
        );
        assert_eq!(p.api_base, "https://llm.internal/v1");
        assert_eq!(p.default_model(), "ops-tuned");
    }

    #[test]
    fn test_is_configured() {
        assert!(provider().is_configured());
        assert!(!OpenAiProvider::new("", None, None).is_configured());
    }

    #[test]
    fn test_build_request_basic() {
        let request = ProviderRequest {
            turns: vec![Turn::user("any failed batches today?")],
            ..Default::default()
        };

        let body = provider().build_request(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 4096);
        assert!(body.get("tools").is_none());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "any failed batches today?");
    }

    #[test]
    fn test_build_request_inlines_system() {
        let request = ProviderRequest {
            system: Some("You monitor a data platform.".to_string()),
            turns: vec![Turn::user("hi")],
            ..Default::default()
        };

        let body = provider().build_request(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You monitor a data platform.");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn test_build_request_with_tools() {
        let request = ProviderRequest {
            turns: vec![Turn::user("show me dataset ds-1")],
            tools: vec![ToolSpec::new(
                "get_dataset",
                "Fetch a dataset by id",
                json!({
                    "type": "object",
                    "properties": { "dataset_id": { "type": "string" } },
                    "required": ["dataset_id"]
                }),
            )],
            ..Default::default()
        };

        let body = provider().build_request(&request);

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "get_dataset");
        assert_eq!(
            tools[0]["function"]["parameters"]["required"],
            json!(["dataset_id"])
        );
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_build_request_explicit_model_wins() {
        let request = ProviderRequest {
            model: "gpt-4.1".to_string(),
            turns: vec![Turn::user("hi")],
            ..Default::default()
        };
        let body = provider().build_request(&request);
        assert_eq!(body["model"], "gpt-4.1");
    }

    #[test]
    fn test_parse_response_text_only() {
        let body = json!({
            "choices": [{
                "message": { "content": "All flows are green.", "role": "assistant" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18 }
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.text(), "All flows are green.");
        assert!(!response.has_tool_calls());
        assert_eq!(response.usage.total_tokens, 18);
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": Value::Null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_batch",
                            "arguments": "{\"batch_id\": \"b-42\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].name, "get_batch");
        assert_eq!(response.tool_calls[0].arguments, json!({"batch_id": "b-42"}));
    }

    #[test]
    fn test_parse_response_missing_arguments_become_empty_map() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "list_batches" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn test_parse_response_unparsable_arguments_become_empty_map() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "list_batches", "arguments": "not json" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn test_parse_response_object_arguments_accepted() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {
                            "name": "get_batch",
                            "arguments": { "batch_id": "b-7" }
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let response = provider().parse_response(body).unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!({"batch_id": "b-7"}));
    }

    #[test]
    fn test_parse_response_empty_choices_is_invalid() {
        let result = provider().parse_response(json!({ "choices": [] }));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let body = json!({
            "choices": [{
                "message": {
                    "tool_calls": [
                        { "id": "a", "function": { "name": "x", "arguments": "{}" } },
                        { "id": "b", "function": { "name": "y", "arguments": "{\"k\":1}" } }
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });

        let first = provider().parse_response(body.clone()).unwrap();
        let second = provider().parse_response(body).unwrap();
        assert_eq!(first.tool_calls, second.tool_calls);
    }

    #[test]
    fn test_constraints() {
        let c = provider().constraints();
        assert!(!c.first_turn_must_be_user);
        assert!(!c.strict_alternation);
        assert_eq!(c.system, SystemStyle::Inline);
    }
}
