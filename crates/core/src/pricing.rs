use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::Product;
use crate::domain::promotion::{Promotion, PromotionId};
use crate::domain::shop::PromoStrategy;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

/// Outcome of pricing one cart line.
///
/// `applied` is the single promotion chosen by a pick strategy. `Cumulative`
/// never names one; the promotions it folded in are listed in `stacked`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoResolution {
    pub final_price: Decimal,
    pub applied: Option<Promotion>,
    pub stacked: Vec<PromotionId>,
    pub strategy: PromoStrategy,
    pub trace: Vec<PricingTraceStep>,
}

impl PromoResolution {
    fn base(unit_price: Decimal, quantity: u32, strategy: PromoStrategy, detail: &str) -> Self {
        let amount = unit_price * Decimal::from(quantity);
        Self {
            final_price: amount,
            applied: None,
            stacked: Vec::new(),
            strategy,
            trace: vec![PricingTraceStep {
                stage: "base".to_string(),
                detail: detail.to_string(),
                amount,
            }],
        }
    }

    pub fn discount(&self, unit_price: Decimal, quantity: u32) -> Decimal {
        unit_price * Decimal::from(quantity) - self.final_price
    }
}

pub trait PromoEngine: Send + Sync {
    fn resolve(
        &self,
        product: &Product,
        quantity: u32,
        strategy: PromoStrategy,
        now: DateTime<Utc>,
    ) -> PromoResolution;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicPromoEngine;

impl PromoEngine for DeterministicPromoEngine {
    fn resolve(
        &self,
        product: &Product,
        quantity: u32,
        strategy: PromoStrategy,
        now: DateTime<Utc>,
    ) -> PromoResolution {
        resolve_price(product.sell_price, &product.promotions, quantity, strategy, now)
    }
}

/// Price `quantity` units at `unit_price` under the shop's strategy, considering
/// only promotions active at `now`. Ties keep the first promotion in list order.
pub fn resolve_price(
    unit_price: Decimal,
    promotions: &[Promotion],
    quantity: u32,
    strategy: PromoStrategy,
    now: DateTime<Utc>,
) -> PromoResolution {
    let active: Vec<&Promotion> =
        promotions.iter().filter(|promotion| promotion.is_active_at(now)).collect();

    if active.is_empty() || quantity == 0 {
        return PromoResolution::base(unit_price, quantity, strategy, "no active promotion");
    }

    match strategy {
        PromoStrategy::BestForClient => {
            let mut best: Option<(&Promotion, Decimal)> = None;
            for promotion in &active {
                let price = promotion.price_for(unit_price, quantity);
                if best.map_or(true, |(_, current)| price < current) {
                    best = Some((promotion, price));
                }
            }
            single_pick(unit_price, quantity, strategy, best.map(|(promotion, _)| promotion))
        }
        PromoStrategy::MostRecent => {
            let mut latest: Option<&Promotion> = None;
            for promotion in &active {
                if latest.map_or(true, |current| promotion.created_at > current.created_at) {
                    latest = Some(promotion);
                }
            }
            single_pick(unit_price, quantity, strategy, latest)
        }
        PromoStrategy::FirstStarted => {
            let mut earliest: Option<&Promotion> = None;
            for promotion in &active {
                if earliest.map_or(true, |current| promotion.start_date < current.start_date) {
                    earliest = Some(promotion);
                }
            }
            single_pick(unit_price, quantity, strategy, earliest)
        }
        PromoStrategy::Cumulative => {
            let mut resolution =
                PromoResolution::base(unit_price, quantity, strategy, "sell_price * quantity");
            let units = Decimal::from(quantity);
            for promotion in active {
                let running_unit = resolution.final_price / units;
                resolution.final_price = promotion.price_for(running_unit, quantity);
                resolution.trace.push(PricingTraceStep {
                    stage: "promotion".to_string(),
                    detail: promotion.name.clone(),
                    amount: resolution.final_price,
                });
                resolution.stacked.push(promotion.id);
            }
            resolution
        }
        PromoStrategy::Unrecognized => {
            PromoResolution::base(unit_price, quantity, strategy, "unrecognized strategy")
        }
    }
}

fn single_pick(
    unit_price: Decimal,
    quantity: u32,
    strategy: PromoStrategy,
    chosen: Option<&Promotion>,
) -> PromoResolution {
    let mut resolution =
        PromoResolution::base(unit_price, quantity, strategy, "sell_price * quantity");
    if let Some(promotion) = chosen {
        resolution.final_price = promotion.price_for(unit_price, quantity);
        resolution.trace.push(PricingTraceStep {
            stage: "promotion".to_string(),
            detail: promotion.name.clone(),
            amount: resolution.final_price,
        });
        resolution.applied = Some(promotion.clone());
    }
    resolution
}
