use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model. `arguments` is always a JSON
/// object; providers that send a string are decoded before reaching here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn arguments_raw(&self) -> String {
        self.arguments.to_string()
    }
}

/// One entry of the conversation as exchanged with the model and persisted
/// in the history store. The store never interprets `content`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.filter(|text| !text.is_empty()),
            tool_call_id: None,
            tool_name: None,
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            tool_calls: Vec::new(),
        }
    }

    fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Declared tool: name, description and JSON-schema parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            _ => Self::Other,
        }
    }
}

/// Provider-neutral model reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), tool_calls: Vec::new(), finish_reason: FinishReason::Stop }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { content: None, tool_calls, finish_reason: FinishReason::ToolCalls }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider is misconfigured: {0}")]
    Configuration(String),
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm call timed out after {0} seconds")]
    Timeout(u64),
}

impl From<reqwest::Error> for LlmError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Name reported back to callers as the provider that answered.
    fn provider_name(&self) -> &str;

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system_prompt: &str,
    ) -> Result<LlmResponse, LlmError>;
}

/// Tool arguments may arrive as an object or as a JSON-encoded string.
pub(crate) fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(encoded) if encoded.trim().is_empty() => Value::Object(Default::default()),
        Value::String(encoded) => serde_json::from_str(encoded)
            .unwrap_or_else(|_| Value::Object(Default::default())),
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_arguments, ChatMessage, ChatRole, FinishReason, ToolCall};

    #[test]
    fn messages_round_trip_through_the_history_format() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "search_products".to_string(),
            arguments: json!({"query": "pain"}),
        };
        let message = ChatMessage::assistant_tool_calls(Some(String::new()), vec![call]);
        let encoded = serde_json::to_value(&message).expect("encode");

        assert_eq!(encoded["role"], "assistant");
        assert!(encoded.get("content").is_none());
        assert_eq!(encoded["tool_calls"][0]["arguments"]["query"], "pain");

        let decoded: ChatMessage = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, message);
        assert_eq!(decoded.role, ChatRole::Assistant);
    }

    #[test]
    fn string_encoded_arguments_are_decoded() {
        assert_eq!(decode_arguments(&json!("{\"shop_id\": 3}")), json!({"shop_id": 3}));
        assert_eq!(decode_arguments(&json!("")), json!({}));
        assert_eq!(decode_arguments(&json!("not json")), json!({}));
        assert_eq!(decode_arguments(&json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn finish_reasons_from_every_provider_normalize() {
        assert_eq!(FinishReason::parse("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("MAX_TOKENS"), FinishReason::Length);
        assert_eq!(FinishReason::parse("SAFETY"), FinishReason::Other);
    }
}
