use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::shop::ShopId;

use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

use super::args;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddToCart,
    ViewShop,
    GetDetails,
    Navigate,
}

impl ActionType {
    pub const ALL: [Self; 4] = [Self::AddToCart, Self::ViewShop, Self::GetDetails, Self::Navigate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddToCart => "add_to_cart",
            Self::ViewShop => "view_shop",
            Self::GetDetails => "get_details",
            Self::Navigate => "navigate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw.trim())
    }
}

/// A clickable suggestion shown to the customer. Nothing runs until the
/// customer confirms it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub id: Uuid,
    pub label: String,
    pub description: String,
    pub action_type: ActionType,
    pub product_id: Option<ProductId>,
    pub shop_id: Option<ShopId>,
    pub quantity: u32,
}

/// One entry of a `propose_actions` call before the guardrails have seen it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ProposalRequest {
    label: String,
    description: String,
    action_type: String,
    product_id: Option<i64>,
    shop_id: Option<i64>,
    quantity: Option<i64>,
}

impl ProposalRequest {
    pub(crate) fn from_json(raw: &Value) -> Self {
        Self {
            label: args::string(raw, "label").unwrap_or_default(),
            description: args::string(raw, "description").unwrap_or_default(),
            action_type: args::string(raw, "action_type").unwrap_or_default(),
            product_id: args::integer(raw, "product_id"),
            shop_id: args::integer(raw, "shop_id"),
            quantity: args::integer(raw, "quantity"),
        }
    }

    fn intent(&self) -> GuardrailIntent {
        GuardrailIntent::Proposal {
            action_type: self.action_type.clone(),
            product_id: self.product_id,
            shop_id: self.shop_id,
            quantity: self.quantity,
        }
    }

    /// Runs the proposal past the guardrails. Degraded proposals are kept
    /// with their quantity clamped; denied ones come back as the decision.
    pub(crate) fn review(self, policy: &GuardrailPolicy) -> Result<ProposedAction, GuardrailDecision> {
        let decision = policy.evaluate(&self.intent());
        if matches!(decision, GuardrailDecision::Deny { .. })
            || decision.reason_code() == Some("proposals_disabled")
        {
            return Err(decision);
        }
        let action_type = ActionType::parse(&self.action_type).ok_or(decision)?;
        let quantity = self.quantity.unwrap_or(1).clamp(1, policy.max_proposal_quantity.max(1));

        Ok(ProposedAction {
            id: Uuid::new_v4(),
            label: self.label,
            description: self.description,
            action_type,
            product_id: self.product_id.filter(|id| *id > 0).map(ProductId),
            shop_id: self.shop_id.filter(|id| *id > 0).map(ShopId),
            quantity: u32::try_from(quantity).unwrap_or(1),
        })
    }
}

/// Proposals gathered across every tool call of one chat request.
/// Never cleared implicitly; the loop resets it when a request starts.
#[derive(Clone, Debug, Default)]
pub struct CapturedActions {
    accepted: Vec<ProposedAction>,
}

impl CapturedActions {
    pub fn reset(&mut self) {
        self.accepted.clear();
    }

    pub fn push(&mut self, action: ProposedAction) {
        self.accepted.push(action);
    }

    pub fn actions(&self) -> &[ProposedAction] {
        &self.accepted
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn take(&mut self) -> Vec<ProposedAction> {
        std::mem::take(&mut self.accepted)
    }
}
