use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::promotion::Promotion;
use crate::domain::shop::ShopId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOfPrice {
    #[default]
    Unit,
    Kg,
    G,
    Mg,
    L,
    Ml,
}

impl UnitOfPrice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Kg => "kg",
            Self::G => "g",
            Self::Mg => "mg",
            Self::L => "l",
            Self::Ml => "ml",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unit" => Some(Self::Unit),
            "kg" => Some(Self::Kg),
            "g" => Some(Self::G),
            "mg" => Some(Self::Mg),
            "l" => Some(Self::L),
            "ml" => Some(Self::Ml),
            _ => None,
        }
    }
}

/// A product as sold by one shop, together with every promotion attached to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub shop_id: ShopId,
    pub name: String,
    pub description: String,
    pub sell_price: Decimal,
    pub unit_of_price: UnitOfPrice,
    pub barcode: Option<String>,
    pub promotions: Vec<Promotion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn active_promotions(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Promotion> {
        self.promotions.iter().filter(move |promotion| promotion.is_active_at(now))
    }

    pub fn has_active_promotion(&self, now: DateTime<Utc>) -> bool {
        self.active_promotions(now).next().is_some()
    }

    pub fn matches_text(&self, needle: &str) -> bool {
        self.search_text().contains(&fold_for_search(needle))
    }

    pub fn search_text(&self) -> String {
        product_search_text(&self.name, &self.description)
    }
}

/// Name and description folded with [`fold_for_search`], one per line.
pub fn product_search_text(name: &str, description: &str) -> String {
    format!("{}\n{}", fold_for_search(name), fold_for_search(description))
}

/// Unicode lower-casing applied to both stored text and search input, so
/// `"Éclair"` and `"éclair"` compare equal wherever the comparison runs.
pub fn fold_for_search(text: &str) -> String {
    text.trim().to_lowercase()
}
