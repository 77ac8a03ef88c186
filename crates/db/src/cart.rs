//! Per-user carts kept in the ephemeral store.
//!
//! Each cart lives under `cart:{user}:{cart}` and the user's cart ids under
//! `cart:{user}:list`. Both keys get a rolling TTL on every write. Updates are
//! read-modify-write without versioning, so concurrent writers to one cart
//! resolve as last-writer-wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use bazaar_core::domain::bill::{
    BillId, BillItem, BillNumber, BillOwner, BillStatus, GuestContact, NewBill,
};
use bazaar_core::domain::cart::{
    Cart, CartId, CartItem, PromoSnapshot, MAX_CARTS_PER_USER, MAX_LINE_QUANTITY,
};
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::shop::ShopId;
use bazaar_core::domain::user::UserId;
use bazaar_core::errors::{ApplicationError, DomainError, ResourceKind};
use bazaar_core::pricing::PromoEngine;

use crate::kv::{cart_index_key, cart_key, load_json, store_json, KeyValueStore, StoreError};
use crate::repositories::{BillRepository, ProductRepository, RepositoryError, ShopRepository};

pub const CART_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("cart {0} was not found")]
    CartNotFound(CartId),
    #[error("product {0} was not found")]
    ProductNotFound(ProductId),
    #[error("shop {0} was not found")]
    ShopNotFound(ShopId),
    #[error("product {0} is not in the cart")]
    ItemNotFound(ProductId),
    #[error("a user may hold at most {max} carts")]
    Capacity { max: usize },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DomainError> for CartError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(message) | DomainError::InvariantViolation(message) => {
                Self::Validation(message)
            }
        }
    }
}

impl From<CartError> for ApplicationError {
    fn from(value: CartError) -> Self {
        match value {
            CartError::CartNotFound(id) => Self::not_found(ResourceKind::Cart, id),
            CartError::ProductNotFound(id) => Self::not_found(ResourceKind::Product, id),
            CartError::ShopNotFound(id) => Self::not_found(ResourceKind::Shop, id),
            CartError::ItemNotFound(id) => Self::not_found(ResourceKind::CartItem, id),
            CartError::Capacity { .. } => Self::Conflict(value.to_string()),
            CartError::Validation(message) => Self::Domain(DomainError::Validation(message)),
            CartError::Store(error) => Self::Persistence(error.to_string()),
            CartError::Repository(RepositoryError::Constraint(message)) => {
                Self::Domain(DomainError::Validation(message))
            }
            CartError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutBill {
    pub bill_id: BillId,
    pub number: BillNumber,
    pub shop_id: ShopId,
    pub total_amount: Decimal,
}

/// Every bill produced by one checkout, one per shop, in cart order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub cart_id: CartId,
    pub bills: Vec<CheckoutBill>,
}

impl CheckoutReceipt {
    pub fn last_bill_id(&self) -> Option<BillId> {
        self.bills.last().map(|bill| bill.bill_id)
    }
}

pub fn default_cart_name(now: DateTime<Utc>) -> String {
    format!("Cart of {}", now.format("%d/%m/%Y"))
}

pub struct CartStore {
    store: Arc<dyn KeyValueStore>,
    shops: Arc<dyn ShopRepository>,
    products: Arc<dyn ProductRepository>,
    bills: Arc<dyn BillRepository>,
    engine: Arc<dyn PromoEngine>,
    clock: Clock,
    ttl: Duration,
}

impl CartStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        shops: Arc<dyn ShopRepository>,
        products: Arc<dyn ProductRepository>,
        bills: Arc<dyn BillRepository>,
        engine: Arc<dyn PromoEngine>,
    ) -> Self {
        Self { store, shops, products, bills, engine, clock: Arc::new(Utc::now), ttl: CART_TTL }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn get_cart(&self, user_id: &str, cart_id: &CartId) -> Result<Cart, CartError> {
        load_json::<Cart>(self.store.as_ref(), &cart_key(user_id, cart_id.as_str()))
            .await?
            .ok_or_else(|| CartError::CartNotFound(cart_id.clone()))
    }

    /// Live carts, oldest first. Index entries whose cart already expired are dropped.
    pub async fn list_carts(&self, user_id: &str) -> Result<Vec<Cart>, CartError> {
        let index = cart_index_key(user_id);
        let mut carts = Vec::new();
        for cart_id in self.store.set_members(&index).await? {
            match load_json::<Cart>(self.store.as_ref(), &cart_key(user_id, &cart_id)).await? {
                Some(cart) => carts.push(cart),
                None => {
                    debug!(
                        event_name = "cart.index.evicted",
                        user_id = %user_id,
                        cart_id = %cart_id,
                        "dropping expired cart from index"
                    );
                    self.store.set_remove(&index, &cart_id).await?;
                }
            }
        }
        carts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(carts)
    }

    pub async fn create_cart(&self, user_id: &str, name: &str) -> Result<Cart, CartError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CartError::Validation("cart name is required".to_string()));
        }
        if self.list_carts(user_id).await?.len() >= MAX_CARTS_PER_USER {
            return Err(CartError::Capacity { max: MAX_CARTS_PER_USER });
        }

        let cart = Cart::new(name, self.now());
        self.persist(user_id, &cart).await?;
        info!(
            event_name = "cart.created",
            user_id = %user_id,
            cart_id = %cart.id,
            "cart created"
        );
        Ok(cart)
    }

    pub async fn rename_cart(
        &self,
        user_id: &str,
        cart_id: &CartId,
        name: &str,
    ) -> Result<Cart, CartError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CartError::Validation("cart name is required".to_string()));
        }
        let mut cart = self.get_cart(user_id, cart_id).await?;
        cart.name = name.to_string();
        cart.touch(self.now());
        self.persist(user_id, &cart).await?;
        Ok(cart)
    }

    pub async fn delete_cart(&self, user_id: &str, cart_id: &CartId) -> Result<(), CartError> {
        let removed = self.store.delete(&cart_key(user_id, cart_id.as_str())).await?;
        self.store.set_remove(&cart_index_key(user_id), cart_id.as_str()).await?;
        if !removed {
            return Err(CartError::CartNotFound(cart_id.clone()));
        }
        info!(event_name = "cart.deleted", user_id = %user_id, cart_id = %cart_id, "cart deleted");
        Ok(())
    }

    /// Adds `quantity` units, merging into an existing line for the same product
    /// and re-pricing that line for its new total quantity.
    pub async fn add_item(
        &self,
        user_id: &str,
        cart_id: &CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        if quantity == 0 {
            return Err(CartError::Validation("quantity must be greater than zero".to_string()));
        }
        let mut cart = self.get_cart(user_id, cart_id).await?;
        let total_quantity =
            cart.item(product_id).map_or(quantity, |item| item.quantity.saturating_add(quantity));
        check_line_quantity(total_quantity)?;
        let line = self.price_line(product_id, total_quantity).await?;

        match cart.item_mut(product_id) {
            Some(existing) => *existing = line,
            None => cart.items.push(line),
        }
        cart.touch(self.now());
        self.persist(user_id, &cart).await?;
        info!(
            event_name = "cart.item.added",
            user_id = %user_id,
            cart_id = %cart_id,
            product_id = %product_id,
            quantity = total_quantity,
            "cart item added"
        );
        Ok(cart)
    }

    /// Sets the line to exactly `quantity`; zero removes it.
    pub async fn update_item_quantity(
        &self,
        user_id: &str,
        cart_id: &CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, CartError> {
        check_line_quantity(quantity)?;
        let mut cart = self.get_cart(user_id, cart_id).await?;
        if cart.item(product_id).is_none() {
            return Err(CartError::ItemNotFound(product_id));
        }

        if quantity == 0 {
            cart.remove_item(product_id);
        } else {
            let line = self.price_line(product_id, quantity).await?;
            if let Some(existing) = cart.item_mut(product_id) {
                *existing = line;
            }
        }
        cart.touch(self.now());
        self.persist(user_id, &cart).await?;
        info!(
            event_name = "cart.item.updated",
            user_id = %user_id,
            cart_id = %cart_id,
            product_id = %product_id,
            quantity,
            "cart item quantity updated"
        );
        Ok(cart)
    }

    pub async fn remove_item(
        &self,
        user_id: &str,
        cart_id: &CartId,
        product_id: ProductId,
    ) -> Result<Cart, CartError> {
        let mut cart = self.get_cart(user_id, cart_id).await?;
        if !cart.remove_item(product_id) {
            return Err(CartError::ItemNotFound(product_id));
        }
        cart.touch(self.now());
        self.persist(user_id, &cart).await?;
        info!(
            event_name = "cart.item.removed",
            user_id = %user_id,
            cart_id = %cart_id,
            product_id = %product_id,
            "cart item removed"
        );
        Ok(cart)
    }

    /// Turns the cart into one pending bill per shop, copying frozen line
    /// prices verbatim, then deletes the cart. With `guest` set the bills
    /// belong to a guest identified by `user_id`.
    pub async fn checkout(
        &self,
        user_id: &str,
        cart_id: &CartId,
        guest: Option<GuestContact>,
    ) -> Result<CheckoutReceipt, CartError> {
        let cart = self.get_cart(user_id, cart_id).await?;
        if cart.is_empty() {
            return Err(CartError::Validation("cannot check out an empty cart".to_string()));
        }
        let owner = match guest {
            Some(contact) => {
                contact.validate()?;
                BillOwner::Guest { guest_id: user_id.to_string(), contact }
            }
            None => BillOwner::User { user_id: UserId(user_id.to_string()) },
        };

        let now = self.now();
        let drafts: Vec<NewBill> = cart
            .group_by_shop()
            .into_iter()
            .map(|(shop_id, items)| NewBill {
                number: BillNumber::generate(now),
                owner: owner.clone(),
                shop_id,
                status: BillStatus::Pending,
                billed_at: now,
                items: items
                    .into_iter()
                    .map(|item| BillItem {
                        product_id: item.product_id,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        final_price: item.final_price,
                        promotion_id: item.promo.promotion_id,
                    })
                    .collect(),
            })
            .collect();

        // One write for every shop's bill; a failure leaves the cart untouched.
        let receipt = CheckoutReceipt {
            cart_id: cart.id.clone(),
            bills: self
                .bills
                .create_all(drafts)
                .await?
                .into_iter()
                .map(|bill| CheckoutBill {
                    bill_id: bill.id,
                    total_amount: bill.total_amount(),
                    number: bill.number,
                    shop_id: bill.shop_id,
                })
                .collect(),
        };

        self.store.delete(&cart_key(user_id, cart_id.as_str())).await?;
        self.store.set_remove(&cart_index_key(user_id), cart_id.as_str()).await?;
        info!(
            event_name = "cart.checkout.completed",
            user_id = %user_id,
            cart_id = %cart_id,
            bill_count = receipt.bills.len(),
            "cart checked out"
        );
        Ok(receipt)
    }

    async fn price_line(&self, product_id: ProductId, quantity: u32) -> Result<CartItem, CartError> {
        let product = self
            .products
            .find_by_id(product_id)
            .await?
            .ok_or(CartError::ProductNotFound(product_id))?;
        let shop = self
            .shops
            .find_by_id(product.shop_id)
            .await?
            .ok_or(CartError::ShopNotFound(product.shop_id))?;

        if product.sell_price.checked_mul(Decimal::from(quantity)).is_none() {
            return Err(CartError::Validation(format!(
                "line total for product {product_id} is out of range"
            )));
        }
        let resolution = self.engine.resolve(&product, quantity, shop.promo_strategy, self.now());
        Ok(CartItem {
            product_id: product.id,
            product_name: product.name.clone(),
            shop_id: shop.id,
            shop_name: shop.name.clone(),
            quantity,
            unit_price: product.sell_price,
            final_price: resolution.final_price,
            promo: PromoSnapshot::capture(resolution.applied.as_ref()),
        })
    }

    async fn persist(&self, user_id: &str, cart: &Cart) -> Result<(), CartError> {
        let index = cart_index_key(user_id);
        store_json(self.store.as_ref(), &cart_key(user_id, cart.id.as_str()), cart, self.ttl)
            .await?;
        self.store.set_add(&index, cart.id.as_str()).await?;
        self.store.expire(&index, self.ttl).await?;
        Ok(())
    }
}

fn check_line_quantity(quantity: u32) -> Result<(), CartError> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(CartError::Validation(format!(
            "quantity must not exceed {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}
