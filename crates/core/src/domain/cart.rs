use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::promotion::{PromoType, Promotion, PromotionId};
use crate::domain::shop::ShopId;

pub const MAX_CARTS_PER_USER: usize = 5;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: u32 = 999;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub String);

impl CartId {
    /// Eight uppercase hex characters taken from a fresh v4 uuid.
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(raw[..8].to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Promotion fields frozen onto a cart item when its price was last computed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoSnapshot {
    pub promotion_id: Option<PromotionId>,
    pub name: Option<String>,
    pub promo_type: Option<PromoType>,
    pub discount_pct: Option<Decimal>,
    pub buy_quantity: Option<u32>,
    pub get_quantity: Option<u32>,
}

impl PromoSnapshot {
    pub fn capture(promotion: Option<&Promotion>) -> Self {
        match promotion {
            None => Self::default(),
            Some(promotion) => Self {
                promotion_id: Some(promotion.id),
                name: Some(promotion.name.clone()),
                promo_type: Some(promotion.promo_type()),
                discount_pct: promotion.rule.discount_pct(),
                buy_quantity: promotion.rule.buy_quantity(),
                get_quantity: promotion.rule.get_quantity(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.promotion_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub shop_id: ShopId,
    pub shop_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Total for the whole line after promotions, not per unit.
    pub final_price: Decimal,
    #[serde(default)]
    pub promo: PromoSnapshot,
}

impl CartItem {
    pub fn base_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn discount(&self) -> Decimal {
        self.base_price() - self.final_price
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub name: String,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: CartId::generate(),
            name: name.into(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    pub fn item_mut(&mut self, product_id: ProductId) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|item| item.product_id == product_id)
    }

    pub fn remove_item(&mut self, product_id: ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.product_id != product_id);
        self.items.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(|item| item.final_price).sum()
    }

    pub fn total_before_discount(&self) -> Decimal {
        self.items.iter().map(CartItem::base_price).sum()
    }

    pub fn total_discount(&self) -> Decimal {
        self.items.iter().map(CartItem::discount).sum()
    }

    /// Items grouped by shop, shops in order of first appearance in the cart.
    pub fn group_by_shop(&self) -> Vec<(ShopId, Vec<&CartItem>)> {
        let mut groups: Vec<(ShopId, Vec<&CartItem>)> = Vec::new();
        for item in &self.items {
            match groups.iter_mut().find(|(shop_id, _)| *shop_id == item.shop_id) {
                Some((_, items)) => items.push(item),
                None => groups.push((item.shop_id, vec![item])),
            }
        }
        groups
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Cart, CartId, CartItem, PromoSnapshot};
    use crate::domain::product::ProductId;
    use crate::domain::shop::ShopId;

    fn item(product: i64, shop: i64, quantity: u32, unit: i64, final_price: i64) -> CartItem {
        CartItem {
            product_id: ProductId(product),
            product_name: format!("product-{product}"),
            shop_id: ShopId(shop),
            shop_name: format!("shop-{shop}"),
            quantity,
            unit_price: Decimal::new(unit, 0),
            final_price: Decimal::new(final_price, 0),
            promo: PromoSnapshot::default(),
        }
    }

    #[test]
    fn generated_cart_ids_are_eight_uppercase_hex_chars() {
        let id = CartId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn totals_follow_item_lines() {
        let mut cart = Cart::new("weekly", Utc::now());
        cart.items.push(item(1, 1, 3, 10, 24));
        cart.items.push(item(2, 2, 2, 5, 10));

        assert_eq!(cart.total_amount(), Decimal::new(34, 0));
        assert_eq!(cart.total_before_discount(), Decimal::new(40, 0));
        assert_eq!(cart.total_discount(), Decimal::new(6, 0));
    }

    #[test]
    fn grouping_keeps_first_seen_shop_order() {
        let mut cart = Cart::new("mixed", Utc::now());
        cart.items.push(item(1, 7, 1, 1, 1));
        cart.items.push(item(2, 3, 1, 1, 1));
        cart.items.push(item(3, 7, 1, 1, 1));

        let groups = cart.group_by_shop();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, ShopId(7));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, ShopId(3));
    }

    #[test]
    fn removing_missing_item_reports_false() {
        let mut cart = Cart::new("c", Utc::now());
        cart.items.push(item(1, 1, 1, 1, 1));
        assert!(!cart.remove_item(ProductId(99)));
        assert!(cart.remove_item(ProductId(1)));
        assert!(cart.is_empty());
    }
}
