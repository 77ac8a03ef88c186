//! Anthropic messages API with `tool_use` / `tool_result` content blocks.

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

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(http: Client, config: &LlmConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/messages", config.effective_base_url()),
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
    let tools: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect();

    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "temperature": temperature,
        "system": system_prompt,
        "tools": tools,
        "messages": wire_messages(messages),
    })
}

/// Consecutive tool results fold into a single `user` turn, as the API
/// requires every `tool_use` to be answered in the next message.
fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for message in messages {
        if message.role == ChatRole::Tool {
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id,
                "content": message.content_or_empty(),
            }));
            continue;
        }
        if !pending_results.is_empty() {
            wire.push(json!({"role": "user", "content": std::mem::take(&mut pending_results)}));
        }

        if message.role == ChatRole::Assistant && !message.tool_calls.is_empty() {
            let mut blocks = Vec::new();
            if let Some(text) = message.content.as_deref().filter(|text| !text.is_empty()) {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            wire.push(json!({"role": "assistant", "content": blocks}));
        } else {
            wire.push(json!({
                "role": message.role.as_str(),
                "content": message.content_or_empty(),
            }));
        }
    }
    if !pending_results.is_empty() {
        wire.push(json!({"role": "user", "content": pending_results}));
    }
    wire
}

pub(crate) fn parse_response(raw: &Value) -> Result<LlmResponse, LlmError> {
    let blocks = raw
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::Decode("response carries no content blocks".to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Some("tool_use") => {
                let Some(name) = block.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall { id, name: name.to_string(), arguments });
            }
            _ => {}
        }
    }

    let finish_reason = raw
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(FinishReason::parse)
        .unwrap_or(if tool_calls.is_empty() { FinishReason::Stop } else { FinishReason::ToolCalls });
    Ok(LlmResponse { content: Some(text).filter(|text| !text.is_empty()), tool_calls, finish_reason })
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_name(&self) -> &str {
        "anthropic"
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
            .ok_or_else(|| LlmError::Configuration("anthropic api key is not set".to_string()))?;
        let payload = build_payload(&self.model, self.temperature, messages, tools, system_prompt);
        let request = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&payload);
        parse_response(&send_json(request).await?)
    }
}
