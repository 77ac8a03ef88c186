use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use bazaar_core::domain::cart::{Cart, CartId};
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::shop::ShopId;
use bazaar_core::errors::{ApplicationError, DomainError};
use bazaar_db::cart::{default_cart_name, CartError, Clock};
use bazaar_db::kv::StoreError;

use crate::guardrails::{GuardrailDecision, GuardrailIntent};
use crate::history::{ConversationHistory, MAX_HISTORY_MESSAGES};
use crate::llm::{ChatMessage, LlmClient, LlmError, LlmResponse, ToolDefinition};
use crate::tools::{tool_catalog, ActionType, ProposedAction, ToolBackend, ToolExecutor};

pub const MAX_TURNS: usize = 6;
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

const LLM_FAILURE_MARKER: &str = "Error while communicating with the LLM.";
const LLM_FAILURE_REPLY: &str = "Something went wrong, please try again.";
const TURN_LIMIT_MARKER: &str = "Turn limit reached.";
const TURN_LIMIT_REPLY: &str = "I did not understand, could you rephrase?";

pub const SYSTEM_PROMPT: &str = "\
You are a shopping assistant for a marketplace of local shops.

SEARCH
- The customer looks for a product: call search_products with a keyword query (e.g. \"bread\", \"cheese\").
- The customer wants every shop: call search_shops without parameters.
- The customer wants the products of a shop: call get_products_by_shop with a shop_id taken from search_shops.
- The customer asks about deals: call search_best_promotions or get_promotions_by_shop.
- Always call propose_actions after a search that returned results.
- Never pass empty strings as parameters; omit a parameter that has no value.
- Never invent shop_id or product_id values; only use ids returned by tools.

CART
- Offer \"add_to_cart\" with the real product_id, shop_id and quantity.
- Never add anything to a cart without the customer's explicit confirmation.

ACCOUNT
- To register or sign in, ask for the email first and for the password in a second message.
- After a successful sign in or registration, carry on with the conversation.

propose_actions
action_type is one of \"add_to_cart\", \"view_shop\", \"get_details\", \"navigate\".
- add_to_cart needs product_id, shop_id and quantity.
- view_shop needs shop_id.
- get_details needs product_id.
- navigate is for general navigation.

GENERAL
- Answer in the customer's language, naturally and concisely.
- When in doubt, call a tool rather than answer from memory.
- Never call propose_actions when a search found nothing; ask the customer to rephrase instead.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChatRequest {
    pub message: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub cart_id: Option<String>,
}

/// Derived per request from the captured proposals; never stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingConfirmation,
    ActionExecuted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub message: String,
    pub proposed_actions: Vec<ProposedAction>,
    pub state: ConversationState,
    pub provider_used: Option<String>,
}

impl AgentResponse {
    fn degraded(message: &str) -> Self {
        Self {
            message: message.to_string(),
            proposed_actions: Vec::new(),
            state: ConversationState::Idle,
            provider_used: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub shop_id: Option<ShopId>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

impl Default for ActionPayload {
    fn default() -> Self {
        Self { product_id: None, shop_id: None, quantity: default_quantity() }
    }
}

fn default_quantity() -> i64 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub payload: ActionPayload,
    #[serde(default)]
    pub cart_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmActionResponse {
    pub message: String,
    pub action_type: ActionType,
    pub state: ConversationState,
    pub cart_id: Option<CartId>,
    pub cart: Option<Cart>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    History(#[from] StoreError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error("{message}")]
    Refused { reason_code: &'static str, message: String },
    #[error("{0}")]
    Validation(String),
}

impl From<AgentError> for ApplicationError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::History(error) => Self::Persistence(error.to_string()),
            AgentError::Cart(error) => error.into(),
            AgentError::Refused { reason_code: "authentication_required", message } => {
                Self::Unauthorized(message)
            }
            AgentError::Refused { message, .. } | AgentError::Validation(message) => {
                Self::Domain(DomainError::Validation(message))
            }
        }
    }
}

/// Bounded tool-calling loop between the customer, the model and the backend.
///
/// The model never mutates carts here: mutations only come back as proposed
/// actions that the customer executes through [`AgentLoop::confirm`].
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolBackend>,
    history: ConversationHistory,
    catalog: Vec<ToolDefinition>,
    llm_timeout: Duration,
    max_turns: usize,
    clock: Clock,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolBackend>, history: ConversationHistory) -> Self {
        Self {
            llm,
            tools,
            history,
            catalog: tool_catalog(),
            llm_timeout: DEFAULT_LLM_TIMEOUT,
            max_turns: MAX_TURNS,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.llm.provider_name()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn run(
        &self,
        user_id: &str,
        request: &AgentChatRequest,
    ) -> Result<AgentResponse, AgentError> {
        let stored = self.history.get(user_id).await?;
        let mut executor = ToolExecutor::new(self.tools.clone(), user_id);
        executor.reset_actions();

        let user_message = ChatMessage::user(contextual_message(user_id, request, self.now()));
        let skip = stored.len().saturating_sub(MAX_HISTORY_MESSAGES);
        let mut messages: Vec<ChatMessage> = stored.into_iter().skip(skip).collect();
        messages.push(user_message.clone());

        for turn in 1..=self.max_turns {
            let response = match self.call_llm(&messages).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(
                        event_name = "agent.llm.failed",
                        user_id = %user_id,
                        provider = self.llm.provider_name(),
                        turn,
                        error = %error,
                        "llm call failed, answering with a degraded reply"
                    );
                    self.persist_exchange(user_id, user_message, LLM_FAILURE_MARKER).await?;
                    return Ok(AgentResponse::degraded(LLM_FAILURE_REPLY));
                }
            };

            if response.tool_calls.is_empty() {
                let content = response.content.unwrap_or_default();
                self.persist_exchange(user_id, user_message, &content).await?;

                let proposed_actions = executor.take_actions();
                let state = if proposed_actions.is_empty() {
                    ConversationState::Idle
                } else {
                    ConversationState::AwaitingConfirmation
                };
                info!(
                    event_name = "agent.turn.completed",
                    user_id = %user_id,
                    provider = self.llm.provider_name(),
                    turn,
                    proposed_actions = proposed_actions.len(),
                    "assistant answered"
                );
                return Ok(AgentResponse {
                    message: content,
                    proposed_actions,
                    state,
                    provider_used: Some(self.llm.provider_name().to_string()),
                });
            }

            debug!(
                event_name = "agent.turn.tool_calls",
                user_id = %user_id,
                turn,
                tool_calls = response.tool_calls.len(),
                "model requested tools"
            );
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = executor.execute(&call.name, &call.arguments).await;
                messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
            }
        }

        warn!(
            event_name = "agent.turn.limit_reached",
            user_id = %user_id,
            max_turns = self.max_turns,
            "no final answer within the turn limit"
        );
        self.persist_exchange(user_id, user_message, TURN_LIMIT_MARKER).await?;
        Ok(AgentResponse::degraded(TURN_LIMIT_REPLY))
    }

    /// Executes an action the customer accepted. Only `add_to_cart` has a
    /// side effect; the other action types are navigation hints.
    pub async fn confirm(
        &self,
        user_id: &str,
        authenticated: bool,
        request: ConfirmActionRequest,
    ) -> Result<ConfirmActionResponse, AgentError> {
        let intent = GuardrailIntent::Confirmation {
            action_type: request.action_type.clone(),
            authenticated,
        };
        if let GuardrailDecision::Deny { reason_code, user_message, .. } =
            self.tools.guardrails().evaluate(&intent)
        {
            return Err(AgentError::Refused { reason_code, message: user_message });
        }
        let action_type = ActionType::parse(&request.action_type).ok_or_else(|| {
            AgentError::Validation(format!("unknown action type `{}`", request.action_type))
        })?;

        if action_type != ActionType::AddToCart {
            info!(
                event_name = "agent.action.acknowledged",
                user_id = %user_id,
                action_type = action_type.as_str(),
                "action confirmed"
            );
            return Ok(ConfirmActionResponse {
                message: "Action confirmed.".to_string(),
                action_type,
                state: ConversationState::ActionExecuted,
                cart_id: None,
                cart: None,
            });
        }

        let product_id = request
            .payload
            .product_id
            .filter(|id| id.0 > 0)
            .ok_or_else(|| AgentError::Validation("product_id is required".to_string()))?;
        let quantity = u32::try_from(request.payload.quantity)
            .ok()
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| AgentError::Validation("quantity must be greater than zero".to_string()))?;

        let carts = self.tools.carts();
        let requested = request
            .cart_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("new"));
        let cart_id = match requested {
            Some(id) => CartId(id.to_string()),
            None => carts.create_cart(user_id, &default_cart_name(self.now())).await?.id,
        };
        let cart = carts.add_item(user_id, &cart_id, product_id, quantity).await?;

        info!(
            event_name = "agent.action.executed",
            user_id = %user_id,
            cart_id = %cart.id,
            product_id = %product_id,
            quantity,
            "confirmed action executed"
        );
        Ok(ConfirmActionResponse {
            message: "Action confirmed.".to_string(),
            action_type,
            state: ConversationState::ActionExecuted,
            cart_id: Some(cart.id.clone()),
            cart: Some(cart),
        })
    }

    async fn call_llm(&self, messages: &[ChatMessage]) -> Result<LlmResponse, LlmError> {
        let call = self.llm.chat_with_tools(messages, &self.catalog, SYSTEM_PROMPT);
        match tokio::time::timeout(self.llm_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.llm_timeout.as_secs())),
        }
    }

    async fn persist_exchange(
        &self,
        user_id: &str,
        user_message: ChatMessage,
        reply: &str,
    ) -> Result<(), AgentError> {
        self.history
            .append_many(user_id, vec![user_message, ChatMessage::assistant(reply)])
            .await?;
        Ok(())
    }
}

/// Prefixes the customer's text with what the model cannot otherwise know.
fn contextual_message(user_id: &str, request: &AgentChatRequest, now: DateTime<Utc>) -> String {
    let mut context = vec![format!("UserId:{user_id}"), format!("Time:{}", now.format("%H:%M"))];
    if let (Some(latitude), Some(longitude)) = (request.latitude, request.longitude) {
        context.push(format!("GPS:{latitude},{longitude}"));
    }
    if let Some(cart_id) = request.cart_id.as_deref().filter(|id| !id.trim().is_empty()) {
        context.push(format!("CartId:{cart_id}"));
    }
    format!("[{}] {}", context.join("|"), request.message)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{contextual_message, AgentChatRequest, ConfirmActionRequest};

    #[test]
    fn context_preamble_includes_optional_fields_only_when_present() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 5, 0).single().expect("valid time");
        let bare = AgentChatRequest { message: "bread?".to_string(), ..AgentChatRequest::default() };
        assert_eq!(contextual_message("guest", &bare, now), "[UserId:guest|Time:09:05] bread?");

        let located = AgentChatRequest {
            message: "cheese".to_string(),
            latitude: Some(45.76),
            longitude: Some(4.83),
            cart_id: Some("A1B2C3D4".to_string()),
        };
        assert_eq!(
            contextual_message("u-1", &located, now),
            "[UserId:u-1|Time:09:05|GPS:45.76,4.83|CartId:A1B2C3D4] cheese"
        );
    }

    #[test]
    fn latitude_without_longitude_is_ignored() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 18, 30, 0).single().expect("valid time");
        let request = AgentChatRequest {
            message: "hi".to_string(),
            latitude: Some(1.0),
            ..AgentChatRequest::default()
        };
        assert_eq!(contextual_message("u", &request, now), "[UserId:u|Time:18:30] hi");
    }

    #[test]
    fn confirm_payload_quantity_defaults_to_one() {
        let request: ConfirmActionRequest = serde_json::from_str(
            r#"{"actionType":"add_to_cart","payload":{"productId":101,"shopId":1}}"#,
        )
        .expect("decode");
        assert_eq!(request.payload.quantity, 1);
        assert_eq!(request.payload.product_id.map(|id| id.0), Some(101));
        assert!(request.cart_id.is_none());
    }
}
