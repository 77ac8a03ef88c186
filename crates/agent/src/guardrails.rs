use crate::tools::ActionType;

/// Tools that would change a cart. The model may only propose these; the
/// customer executes them through the confirmation endpoint.
pub const MUTATING_TOOLS: &[&str] =
    &["add_to_cart", "update_cart_item", "remove_from_cart", "create_cart", "delete_cart", "checkout"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    ToolCall { tool_name: String },
    Proposal {
        action_type: String,
        product_id: Option<i64>,
        shop_id: Option<i64>,
        quantity: Option<i64>,
    },
    Confirmation { action_type: String, authenticated: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub proposals_enabled: bool,
    pub max_proposal_quantity: i64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { proposals_enabled: true, max_proposal_quantity: 99 }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            GuardrailIntent::ToolCall { tool_name } if MUTATING_TOOLS.contains(&tool_name.as_str()) => {
                GuardrailDecision::Deny {
                    reason_code: "direct_mutation_disallowed",
                    user_message: format!(
                        "`{tool_name}` changes the customer's cart and cannot run from chat. Offer it with propose_actions instead."
                    ),
                }
            }
            GuardrailIntent::ToolCall { .. } => GuardrailDecision::Allow,
            GuardrailIntent::Proposal { .. } if !self.proposals_enabled => GuardrailDecision::Degrade {
                reason_code: "proposals_disabled",
                user_message: "Suggested actions are temporarily unavailable.".to_string(),
            },
            GuardrailIntent::Proposal { action_type, product_id, shop_id, quantity } => {
                self.evaluate_proposal(action_type, *product_id, *shop_id, *quantity)
            }
            GuardrailIntent::Confirmation { authenticated: false, .. } => GuardrailDecision::Deny {
                reason_code: "authentication_required",
                user_message: "Sign in to confirm this action.".to_string(),
            },
            GuardrailIntent::Confirmation { action_type, .. } => match ActionType::parse(action_type) {
                Some(_) => GuardrailDecision::Allow,
                None => unknown_action(action_type),
            },
        }
    }

    fn evaluate_proposal(
        &self,
        action_type: &str,
        product_id: Option<i64>,
        shop_id: Option<i64>,
        quantity: Option<i64>,
    ) -> GuardrailDecision {
        let Some(kind) = ActionType::parse(action_type) else {
            return unknown_action(action_type);
        };
        let has_product = product_id.is_some_and(|id| id > 0);
        let has_shop = shop_id.is_some_and(|id| id > 0);

        match kind {
            ActionType::AddToCart if !(has_product && has_shop) => GuardrailDecision::Deny {
                reason_code: "missing_product_or_shop",
                user_message: "Adding to the cart needs both a product and its shop.".to_string(),
            },
            ActionType::AddToCart
                if quantity.is_some_and(|q| q < 1 || q > self.max_proposal_quantity) =>
            {
                GuardrailDecision::Degrade {
                    reason_code: "quantity_adjusted",
                    user_message: format!(
                        "Quantities are limited to 1..={}.",
                        self.max_proposal_quantity
                    ),
                }
            }
            ActionType::ViewShop if !has_shop => GuardrailDecision::Deny {
                reason_code: "missing_shop",
                user_message: "Viewing a shop needs a shop id from a search result.".to_string(),
            },
            ActionType::GetDetails if !has_product => GuardrailDecision::Deny {
                reason_code: "missing_product",
                user_message: "Product details need a product id from a search result.".to_string(),
            },
            _ => GuardrailDecision::Allow,
        }
    }
}

fn unknown_action(action_type: &str) -> GuardrailDecision {
    GuardrailDecision::Deny {
        reason_code: "unknown_action_type",
        user_message: format!("`{action_type}` is not an action the customer can confirm."),
    }
}
