//! OpenAI-style chat completions with function calling. Mistral and Ollama
//! expose the same wire format under their own base URLs.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use bazaar_core::config::{LlmConfig, LlmProvider};

use super::send_json;
use crate::llm::{
    decode_arguments, ChatMessage, ChatRole, FinishReason, LlmClient, LlmError, LlmResponse,
    ToolCall, ToolDefinition,
};

pub struct OpenAiCompatibleClient {
    http: Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            provider: config.provider,
            endpoint: format!("{}/chat/completions", config.effective_base_url()),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        }
    }
}

pub(crate) fn build_payload(
    model: &str,
    temperature: f32,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    system_prompt: &str,
) -> Value {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(json!({"role": "system", "content": system_prompt}));
    for message in messages {
        wire.push(wire_message(message));
    }

    let tools: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect();

    json!({
        "model": model,
        "temperature": temperature,
        "messages": wire,
        "tools": tools,
        "tool_choice": "auto",
    })
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::Assistant if !message.tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": message.content,
            "tool_calls": message.tool_calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments_raw()},
            })).collect::<Vec<_>>(),
        }),
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "name": message.tool_name,
            "content": message.content_or_empty(),
        }),
        role => json!({"role": role.as_str(), "content": message.content_or_empty()}),
    }
}

pub(crate) fn parse_response(raw: &Value) -> Result<LlmResponse, LlmError> {
    let choice = raw
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| LlmError::Decode("response carries no choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| LlmError::Decode("choice carries no message".to_string()))?;

    let content =
        message.get("content").and_then(Value::as_str).map(str::to_string).filter(|text| !text.is_empty());
    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let id = call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let arguments =
                        decode_arguments(function.get("arguments").unwrap_or(&Value::Null));
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some(reason) => FinishReason::parse(reason),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };
    Ok(LlmResponse { content, tool_calls, finish_reason })
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn provider_name(&self) -> &str {
        self.provider.as_str()
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system_prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        let payload = build_payload(&self.model, self.temperature, messages, tools, system_prompt);
        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        parse_response(&send_json(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_payload, parse_response};
    use crate::llm::{ChatMessage, FinishReason, ToolCall, ToolDefinition};

    #[test]
    fn payload_replays_tool_calls_and_results() {
        let call = ToolCall {
            id: "call_7".to_string(),
            name: "get_product_price".to_string(),
            arguments: json!({"product_id": 101}),
        };
        let messages = vec![
            ChatMessage::user("price of apples?"),
            ChatMessage::assistant_tool_calls(None, vec![call]),
            ChatMessage::tool_result("call_7", "get_product_price", "{\"success\":true}"),
        ];
        let tools = vec![ToolDefinition {
            name: "get_product_price".to_string(),
            description: "price".to_string(),
            parameters: json!({"type": "object"}),
        }];

        let payload = build_payload("mistral-large-latest", 0.3, &messages, &tools, "be helpful");
        let wire = payload["messages"].as_array().expect("messages");

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], "{\"product_id\":101}");
        assert_eq!(wire[3]["tool_call_id"], "call_7");
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn tool_call_responses_decode_string_arguments() {
        let raw = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search_products", "arguments": "{\"query\":\"pain\"}"}
                    }]
                }
            }]
        });

        let response = parse_response(&raw).expect("parses");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.content, None);
        assert_eq!(response.tool_calls[0].arguments, json!({"query": "pain"}));
    }

    #[test]
    fn empty_choices_are_a_decode_error() {
        assert!(parse_response(&json!({"choices": []})).is_err());
    }
}
