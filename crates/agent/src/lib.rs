//! Shopping assistant runtime.
//!
//! A bounded tool-calling loop (`runtime`) drives a swappable LLM client
//! (`llm`, `providers`) over a fixed tool catalog (`tools`). Read-only tools
//! run directly; anything that changes a cart can only be proposed, passes
//! through `guardrails`, and runs once the customer confirms it.
//!
//! The model never decides prices. Every figure it quotes comes from the
//! promotion engine through a tool result.

pub mod guardrails;
pub mod history;
pub mod llm;
pub mod providers;
pub mod runtime;
pub mod tools;

pub use guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
pub use history::ConversationHistory;
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmError, LlmResponse, ToolCall, ToolDefinition};
pub use providers::build_client;
pub use runtime::{
    AgentChatRequest, AgentError, AgentLoop, AgentResponse, ConfirmActionRequest,
    ConfirmActionResponse, ConversationState,
};
pub use tools::{ActionType, ProposedAction, ToolBackend, ToolExecutor};
