//! Gemini `generateContent` with `function_declarations`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use bazaar_core::config::LlmConfig;

use super::send_json;
use crate::llm::{
    ChatMessage, ChatRole, FinishReason, LlmClient, LlmError, LlmResponse, ToolCall,
    ToolDefinition,
};

pub struct GeminiClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.effective_base_url(),
                config.model
            ),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        }
    }
}

/// Gemini rejects object schemas with an empty `properties` map, so
/// parameterless tools are declared without parameters.
fn declaration(tool: &ToolDefinition) -> Value {
    let has_properties = tool
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|properties| !properties.is_empty());
    if has_properties {
        json!({"name": tool.name, "description": tool.description, "parameters": tool.parameters})
    } else {
        json!({"name": tool.name, "description": tool.description})
    }
}

fn wire_content(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::Assistant if !message.tool_calls.is_empty() => {
            let parts: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| json!({"functionCall": {"name": call.name, "args": call.arguments}}))
                .collect();
            json!({"role": "model", "parts": parts})
        }
        ChatRole::Assistant => {
            json!({"role": "model", "parts": [{"text": message.content_or_empty()}]})
        }
        ChatRole::Tool => {
            let body = message.content_or_empty();
            let response = serde_json::from_str::<Value>(body)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({"content": body}));
            json!({
                "role": "user",
                "parts": [{"functionResponse": {"name": message.tool_name, "response": response}}]
            })
        }
        ChatRole::User => json!({"role": "user", "parts": [{"text": message.content_or_empty()}]}),
    }
}

pub(crate) fn build_payload(
    temperature: f32,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    system_prompt: &str,
) -> Value {
    json!({
        "system_instruction": {"parts": [{"text": system_prompt}]},
        "contents": messages.iter().map(wire_content).collect::<Vec<_>>(),
        "tools": [{"function_declarations": tools.iter().map(declaration).collect::<Vec<_>>()}],
        "generationConfig": {"temperature": temperature},
    })
}

pub(crate) fn parse_response(raw: &Value) -> Result<LlmResponse, LlmError> {
    let candidate = raw
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| LlmError::Decode("response carries no candidates".to_string()))?;
    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &parts {
        if let Some(call) = part.get("functionCall") {
            let Some(name) = call.get("name").and_then(Value::as_str) else {
                continue;
            };
            tool_calls.push(ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        } else if let Some(fragment) = part.get("text").and_then(Value::as_str) {
            text.push_str(fragment);
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop)
    } else {
        FinishReason::ToolCalls
    };
    Ok(LlmResponse { content: Some(text).filter(|text| !text.is_empty()), tool_calls, finish_reason })
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system_prompt: &str,
    ) -> Result<LlmResponse, LlmError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::Configuration("gemini api key is not set".to_string()))?;
        let payload = build_payload(self.temperature, messages, tools, system_prompt);
        let request = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&payload);
        parse_response(&send_json(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_payload, parse_response};
    use crate::llm::{ChatMessage, FinishReason, ToolDefinition};

    #[test]
    fn parameterless_tools_omit_their_schema() {
        let tools = vec![
            ToolDefinition {
                name: "logout_user".to_string(),
                description: "Signs out.".to_string(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            },
            ToolDefinition {
                name: "get_cart".to_string(),
                description: "Cart.".to_string(),
                parameters: json!({"type": "object", "properties": {"user_id": {"type": "string"}}}),
            },
        ];
        let messages = vec![
            ChatMessage::user("bye"),
            ChatMessage::tool_result("id", "logout_user", "{\"success\":true}"),
            ChatMessage::assistant("done"),
        ];

        let payload = build_payload(0.2, &messages, &tools, "system");
        let declarations = &payload["tools"][0]["function_declarations"];

        assert!(declarations[0].get("parameters").is_none());
        assert!(declarations[1].get("parameters").is_some());
        assert_eq!(payload["contents"][1]["parts"][0]["functionResponse"]["response"]["success"], true);
        assert_eq!(payload["contents"][2]["role"], "model");
    }

    #[test]
    fn every_function_call_part_is_kept() {
        let raw = json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": {"parts": [
                    {"functionCall": {"name": "search_shops", "args": {"city": "Lyon"}}},
                    {"functionCall": {"name": "get_open_shops", "args": {}}}
                ]}
            }]
        });

        let response = parse_response(&raw).expect("parses");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls.len(), 2);
        assert_ne!(response.tool_calls[0].id, response.tool_calls[1].id);
    }
}
