use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::shop::ShopId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromotionId(pub i64);

impl fmt::Display for PromotionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoType {
    Percentage,
    ForXGetY,
}

impl PromoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::ForXGetY => "for_x_get_y",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "percentage" => Some(Self::Percentage),
            "for_x_get_y" | "forxgety" => Some(Self::ForXGetY),
            _ => None,
        }
    }
}

/// Discount rule carried by a promotion. Each variant holds exactly the
/// parameters it needs, so a percentage promotion cannot carry a stray buy count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromotionRule {
    Percentage { discount_pct: Decimal },
    ForXGetY { buy_quantity: u32, get_quantity: u32 },
}

impl PromotionRule {
    pub fn promo_type(&self) -> PromoType {
        match self {
            Self::Percentage { .. } => PromoType::Percentage,
            Self::ForXGetY { .. } => PromoType::ForXGetY,
        }
    }

    pub fn discount_pct(&self) -> Option<Decimal> {
        match self {
            Self::Percentage { discount_pct } => Some(*discount_pct),
            Self::ForXGetY { .. } => None,
        }
    }

    pub fn buy_quantity(&self) -> Option<u32> {
        match self {
            Self::ForXGetY { buy_quantity, .. } => Some(*buy_quantity),
            Self::Percentage { .. } => None,
        }
    }

    pub fn get_quantity(&self) -> Option<u32> {
        match self {
            Self::ForXGetY { get_quantity, .. } => Some(*get_quantity),
            Self::Percentage { .. } => None,
        }
    }

    /// Total price for `quantity` units at `unit_price` with this rule applied.
    ///
    /// For X get Y: each complete group of `buy + get` units pays only for
    /// `buy` of them; at most `buy` units of the remainder are charged.
    pub fn price_for(&self, unit_price: Decimal, quantity: u32) -> Decimal {
        match self {
            Self::Percentage { discount_pct } => {
                unit_price
                    * Decimal::from(quantity)
                    * (Decimal::ONE - *discount_pct / Decimal::ONE_HUNDRED)
            }
            Self::ForXGetY { buy_quantity, get_quantity } => {
                let group = buy_quantity.saturating_add(*get_quantity);
                if group == 0 {
                    return unit_price * Decimal::from(quantity);
                }
                let groups = quantity / group;
                let remainder = quantity % group;
                let paid_units = u64::from(groups) * u64::from(*buy_quantity)
                    + u64::from(remainder.min(*buy_quantity));
                unit_price * Decimal::from(paid_units)
            }
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Percentage { discount_pct } => {
                if *discount_pct <= Decimal::ZERO || *discount_pct > Decimal::ONE_HUNDRED {
                    return Err(DomainError::Validation(
                        "discount percentage must be greater than 0 and at most 100".to_string(),
                    ));
                }
            }
            Self::ForXGetY { buy_quantity, get_quantity } => {
                if *buy_quantity < 1 {
                    return Err(DomainError::Validation(
                        "buy quantity must be at least 1".to_string(),
                    ));
                }
                if *get_quantity < 1 {
                    return Err(DomainError::Validation(
                        "get quantity must be at least 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub shop_id: ShopId,
    pub name: String,
    pub description: Option<String>,
    pub rule: PromotionRule,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub product_ids: Vec<ProductId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Promotion {
    /// Active at `now` iff flagged active and `start_date <= now <= end_date`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }

    pub fn price_for(&self, unit_price: Decimal, quantity: u32) -> Decimal {
        self.rule.price_for(unit_price, quantity)
    }

    pub fn promo_type(&self) -> PromoType {
        self.rule.promo_type()
    }

    pub fn applies_to(&self, product_id: ProductId) -> bool {
        self.product_ids.contains(&product_id)
    }
}

/// Input for creating a promotion; checked before it ever reaches a repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule: PromotionRule,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub product_ids: Vec<ProductId>,
}

fn default_true() -> bool {
    true
}

impl PromotionDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("promotion name is required".to_string()));
        }
        validate_window(self.start_date, self.end_date)?;
        self.rule.validate()
    }

    pub fn into_promotion(
        self,
        id: PromotionId,
        shop_id: ShopId,
        now: DateTime<Utc>,
    ) -> Result<Promotion, DomainError> {
        self.validate()?;
        Ok(Promotion {
            id,
            shop_id,
            name: self.name.trim().to_string(),
            description: self.description,
            rule: self.rule,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
            product_ids: self.product_ids,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update; only `Some` fields change. The merged promotion is revalidated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule: Option<PromotionRule>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub product_ids: Option<Vec<ProductId>>,
}

impl PromotionPatch {
    pub fn apply_to(
        self,
        promotion: &Promotion,
        now: DateTime<Utc>,
    ) -> Result<Promotion, DomainError> {
        let mut updated = promotion.clone();
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(DomainError::Validation("promotion name is required".to_string()));
            }
            updated.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            updated.description = Some(description);
        }
        if let Some(rule) = self.rule {
            updated.rule = rule;
        }
        if let Some(start_date) = self.start_date {
            updated.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            updated.end_date = end_date;
        }
        if let Some(is_active) = self.is_active {
            updated.is_active = is_active;
        }
        if let Some(product_ids) = self.product_ids {
            updated.product_ids = product_ids;
        }

        validate_window(updated.start_date, updated.end_date)?;
        updated.rule.validate()?;
        updated.updated_at = now;
        Ok(updated)
    }
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), DomainError> {
    if start >= end {
        return Err(DomainError::Validation(
            "promotion start date must be before its end date".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{Promotion, PromotionDraft, PromotionId, PromotionPatch, PromotionRule};
    use crate::domain::shop::ShopId;
    use crate::errors::DomainError;

    fn draft(rule: PromotionRule) -> PromotionDraft {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date");
        PromotionDraft {
            name: "Winter sale".to_string(),
            description: None,
            rule,
            start_date: start,
            end_date: start + Duration::days(30),
            is_active: true,
            product_ids: Vec::new(),
        }
    }

    fn promotion(rule: PromotionRule) -> Promotion {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date");
        draft(rule).into_promotion(PromotionId(1), ShopId(1), now).expect("valid draft")
    }

    #[test]
    fn percentage_price_scales_unit_price_and_quantity() {
        let rule = PromotionRule::Percentage { discount_pct: Decimal::new(20, 0) };
        assert_eq!(rule.price_for(Decimal::new(10, 0), 3), Decimal::new(24, 0));
    }

    #[test]
    fn three_for_two_caps_paid_remainder_at_buy_quantity() {
        let rule = PromotionRule::ForXGetY { buy_quantity: 2, get_quantity: 1 };
        assert_eq!(rule.price_for(Decimal::new(5, 0), 7), Decimal::new(25, 0));
        let two_for_three = PromotionRule::ForXGetY { buy_quantity: 2, get_quantity: 3 };
        assert_eq!(two_for_three.price_for(Decimal::new(5, 0), 4), Decimal::new(10, 0));
        assert_eq!(rule.price_for(Decimal::new(5, 0), 2), Decimal::new(10, 0));
        assert_eq!(rule.price_for(Decimal::new(5, 0), 0), Decimal::ZERO);
    }

    #[test]
    fn activity_window_is_inclusive_on_both_ends() {
        let promo = promotion(PromotionRule::Percentage { discount_pct: Decimal::new(10, 0) });
        assert!(promo.is_active_at(promo.start_date));
        assert!(promo.is_active_at(promo.end_date));
        assert!(!promo.is_active_at(promo.end_date + Duration::seconds(1)));

        let mut disabled = promo.clone();
        disabled.is_active = false;
        assert!(!disabled.is_active_at(promo.start_date));
    }

    #[test]
    fn draft_validation_rejects_out_of_range_rules() {
        let zero_pct = draft(PromotionRule::Percentage { discount_pct: Decimal::ZERO });
        assert!(matches!(zero_pct.validate(), Err(DomainError::Validation(_))));

        let over_pct = draft(PromotionRule::Percentage { discount_pct: Decimal::new(101, 0) });
        assert!(over_pct.validate().is_err());

        let full_pct = draft(PromotionRule::Percentage { discount_pct: Decimal::ONE_HUNDRED });
        assert!(full_pct.validate().is_ok());

        let no_buy = draft(PromotionRule::ForXGetY { buy_quantity: 0, get_quantity: 1 });
        assert!(no_buy.validate().is_err());
    }

    #[test]
    fn draft_validation_rejects_inverted_window_and_blank_name() {
        let mut inverted = draft(PromotionRule::Percentage { discount_pct: Decimal::new(10, 0) });
        inverted.end_date = inverted.start_date;
        assert!(inverted.validate().is_err());

        let mut blank = draft(PromotionRule::Percentage { discount_pct: Decimal::new(10, 0) });
        blank.name = "   ".to_string();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn patch_revalidates_merged_promotion() {
        let promo = promotion(PromotionRule::Percentage { discount_pct: Decimal::new(10, 0) });
        let bad = PromotionPatch { end_date: Some(promo.start_date), ..PromotionPatch::default() };
        assert!(bad.apply_to(&promo, promo.start_date).is_err());

        let good = PromotionPatch { is_active: Some(false), ..PromotionPatch::default() };
        let updated = good.apply_to(&promo, promo.start_date).expect("patch applies");
        assert!(!updated.is_active);
        assert_eq!(updated.name, promo.name);
    }
}
