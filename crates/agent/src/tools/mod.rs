//! Backend tools the model may call, and the executor that runs them.
//!
//! Every call yields a JSON string: `{"success": true, "data": ..}` or
//! `{"success": false, "error": ".."}`. Failures never cross the tool
//! boundary as errors; the model reads them and adapts. Cart mutations are
//! not tools at all: the model can only propose them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use bazaar_core::domain::product::{Product, ProductId};
use bazaar_core::domain::promotion::Promotion;
use bazaar_core::domain::shop::{Shop, ShopId, ShopType};
use bazaar_core::domain::user::{is_guest_key, UserId, UserProfile};
use bazaar_core::pricing::{PromoEngine, PromoResolution};
use bazaar_db::cart::{CartError, CartStore, Clock};
use bazaar_db::identity::{IdentityError, IdentityProvider};
use bazaar_db::repositories::{
    PageRequest, ProductQuery, ProductRepository, RepositoryError, ShopQuery, ShopRepository,
};

use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

mod actions;
mod catalog;

pub use actions::{ActionType, CapturedActions, ProposedAction};
pub use catalog::tool_catalog;

use actions::ProposalRequest;

const SEARCH_RESULT_LIMIT: usize = 8;
const SEARCH_CANDIDATE_LIMIT: u32 = 50;
const SHOP_PRODUCTS_LIMIT: u32 = 15;
const BEST_PROMOTIONS_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("{message}")]
    Refused { reason_code: &'static str, message: String },
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ToolError {
    /// Failures of the backend itself rather than of the model's request.
    fn is_internal(&self) -> bool {
        match self {
            Self::Repository(_) | Self::Cart(CartError::Store(_) | CartError::Repository(_)) => true,
            Self::Identity(error) => {
                matches!(error, IdentityError::Auth(_) | IdentityError::Repository(_))
            }
            _ => false,
        }
    }
}

/// Read/write surface the tools run against. Shared by every request.
pub struct ToolBackend {
    shops: Arc<dyn ShopRepository>,
    products: Arc<dyn ProductRepository>,
    carts: Arc<CartStore>,
    identity: Arc<dyn IdentityProvider>,
    engine: Arc<dyn PromoEngine>,
    guardrails: GuardrailPolicy,
    clock: Clock,
}

impl ToolBackend {
    pub fn new(
        shops: Arc<dyn ShopRepository>,
        products: Arc<dyn ProductRepository>,
        carts: Arc<CartStore>,
        identity: Arc<dyn IdentityProvider>,
        engine: Arc<dyn PromoEngine>,
    ) -> Self {
        Self {
            shops,
            products,
            carts,
            identity,
            engine,
            guardrails: GuardrailPolicy::default(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn carts(&self) -> &Arc<CartStore> {
        &self.carts
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Runs tool calls for one caller during one chat request and collects the
/// actions the model proposes along the way.
pub struct ToolExecutor {
    backend: Arc<ToolBackend>,
    caller: String,
    captured: CapturedActions,
}

impl ToolExecutor {
    pub fn new(backend: Arc<ToolBackend>, caller: impl Into<String>) -> Self {
        Self { backend, caller: caller.into(), captured: CapturedActions::default() }
    }

    pub fn reset_actions(&mut self) {
        self.captured.reset();
    }

    pub fn captured(&self) -> &CapturedActions {
        &self.captured
    }

    pub fn take_actions(&mut self) -> Vec<ProposedAction> {
        self.captured.take()
    }

    pub async fn execute(&mut self, name: &str, arguments: &Value) -> String {
        let outcome = match self.backend.guardrails.evaluate(&GuardrailIntent::ToolCall {
            tool_name: name.to_string(),
        }) {
            GuardrailDecision::Deny { reason_code, user_message, .. } => {
                Err(ToolError::Refused { reason_code, message: user_message })
            }
            _ => self.dispatch(name, arguments).await,
        };

        match outcome {
            Ok(data) => {
                debug!(event_name = "agent.tool.executed", tool = name, success = true, "tool executed");
                json!({"success": true, "data": data}).to_string()
            }
            Err(error) if error.is_internal() => {
                warn!(
                    event_name = "agent.tool.failed",
                    tool = name,
                    error = %error,
                    "tool failed on a backend error"
                );
                json!({"success": false, "error": format!("tool `{name}` failed: {error}")})
                    .to_string()
            }
            Err(error) => {
                debug!(event_name = "agent.tool.executed", tool = name, success = false, error = %error, "tool rejected the call");
                json!({"success": false, "error": error.to_string()}).to_string()
            }
        }
    }

    async fn dispatch(&mut self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        match name {
            "register_user" => self.register_user(arguments).await,
            "login_user" => self.login_user(arguments).await,
            "get_profile" => self.get_profile().await,
            "logout_user" => Ok(json!({"message": "Signed out."})),
            "search_shops" => self.search_shops(arguments).await,
            "get_open_shops" => self.get_open_shops(arguments).await,
            "search_products" => self.search_products(arguments).await,
            "get_products_by_shop" => self.get_products_by_shop(arguments).await,
            "get_product_price" => self.get_product_price(arguments).await,
            "get_promotions_by_shop" => self.get_promotions_by_shop(arguments).await,
            "search_best_promotions" => self.search_best_promotions(arguments).await,
            "get_cart" => self.get_cart().await,
            "propose_actions" => self.propose_actions(arguments),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn register_user(&self, arguments: &Value) -> Result<Value, ToolError> {
        let (Some(email), Some(password)) =
            (args::string(arguments, "email"), args::string(arguments, "password"))
        else {
            return Err(ToolError::InvalidArguments("email and password are required".to_string()));
        };
        let profile = UserProfile {
            email,
            first_name: args::string(arguments, "firstName"),
            last_name: args::string(arguments, "lastName"),
        };

        let identity = &self.backend.identity;
        let user = identity.create_user(profile, &password).await?;
        let token = identity.issue_token(&user)?;
        Ok(json!({
            "message": "Account created.",
            "userId": user.id,
            "email": user.email,
            "token": token.token,
            "role": user.primary_role().map(|role| role.as_str()),
        }))
    }

    async fn login_user(&self, arguments: &Value) -> Result<Value, ToolError> {
        let (Some(email), Some(password)) =
            (args::string(arguments, "email"), args::string(arguments, "password"))
        else {
            return Err(ToolError::InvalidArguments("email and password are required".to_string()));
        };

        let (user, token) = self.backend.identity.sign_in(&email, &password).await?;
        Ok(json!({
            "message": format!("Welcome {}!", user.email),
            "userId": user.id,
            "email": user.email,
            "token": token.token,
            "role": user.primary_role().map(|role| role.as_str()),
        }))
    }

    /// Always the caller's own profile; guests have none.
    async fn get_profile(&self) -> Result<Value, ToolError> {
        if is_guest_key(&self.caller) {
            return Err(ToolError::Refused {
                reason_code: "authentication_required",
                message: "Sign in to see your profile.".to_string(),
            });
        }
        let user_id = UserId(self.caller.clone());
        let user = self
            .backend
            .identity
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| ToolError::NotFound("user not found".to_string()))?;
        Ok(json!({
            "id": user.id,
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
        }))
    }

    async fn search_shops(&self, arguments: &Value) -> Result<Value, ToolError> {
        let query = ShopQuery {
            name: args::string(arguments, "name"),
            city: args::string(arguments, "city"),
            shop_type: args::string(arguments, "type").and_then(|raw| ShopType::parse(&raw)),
            category: args::string(arguments, "category"),
            page: PageRequest::new(1, SEARCH_RESULT_LIMIT as u32),
            ..ShopQuery::default()
        };
        let page = self.backend.shops.list(&query).await?;
        if page.items.is_empty() {
            return Ok(json!({"message": "No shop found.", "shops": []}));
        }
        Ok(json!({
            "totalFound": page.total_count,
            "shops": page.items.iter().map(shop_summary).collect::<Vec<_>>(),
        }))
    }

    async fn get_open_shops(&self, arguments: &Value) -> Result<Value, ToolError> {
        let now = self.backend.now();
        let filter = ShopQuery {
            city: args::string(arguments, "city"),
            category: args::string(arguments, "category"),
            page: PageRequest::new(1, SEARCH_RESULT_LIMIT as u32),
            ..ShopQuery::default()
        };
        let page = self.backend.shops.list_open(now, filter).await?;
        if page.items.is_empty() {
            return Ok(json!({"message": "No shop is open right now.", "shops": []}));
        }
        Ok(json!({
            "totalFound": page.total_count,
            "shops": page
                .items
                .iter()
                .map(|shop| json!({
                    "id": shop.id,
                    "name": shop.name,
                    "status": shop.status.as_str(),
                    "isOpen": shop.is_open_at(now),
                    "address": address_json(shop),
                }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn search_products(&self, arguments: &Value) -> Result<Value, ToolError> {
        let query = args::string(arguments, "query").unwrap_or_default();
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let filter = ProductQuery {
            shop_id: args::integer(arguments, "shop_id").filter(|id| *id > 0).map(ShopId),
            min_price: args::decimal(arguments, "min_price").filter(|price| *price > Decimal::ZERO),
            max_price: args::decimal(arguments, "max_price").filter(|price| *price > Decimal::ZERO),
            ..ProductQuery::default()
        };

        let products = match words.first() {
            None => {
                let query = ProductQuery {
                    page: PageRequest::new(1, SEARCH_RESULT_LIMIT as u32),
                    ..filter
                };
                self.backend.products.list(&query).await?.items
            }
            Some(first) => {
                let query = ProductQuery {
                    search: Some(first.clone()),
                    page: PageRequest::new(1, SEARCH_CANDIDATE_LIMIT),
                    ..filter
                };
                rank_by_keywords(self.backend.products.list(&query).await?.items, &words)
            }
        };

        if products.is_empty() {
            return Ok(json!({
                "message": format!("No product found for '{query}'."),
                "products": [],
            }));
        }

        let shops = self.shops_by_id(products.iter().map(|product| product.shop_id)).await?;
        let now = self.backend.now();
        Ok(json!({
            "totalFound": products.len(),
            "products": products
                .iter()
                .map(|product| {
                    let shop = shops.get(&product.shop_id);
                    json!({
                        "id": product.id,
                        "name": product.name,
                        "sellPrice": product.sell_price,
                        "unitOfPrice": product.unit_of_price.as_str(),
                        "shopId": product.shop_id,
                        "shopName": shop.map(|shop| shop.name.as_str()),
                        "shopStatus": shop.map(|shop| shop.status.as_str()),
                        "shopIsOpen": shop.is_some_and(|shop| shop.is_open_at(now)),
                        "hasPromo": product.has_active_promotion(now),
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }

    async fn get_products_by_shop(&self, arguments: &Value) -> Result<Value, ToolError> {
        let shop_id = args::integer(arguments, "shop_id")
            .map(ShopId)
            .ok_or_else(|| ToolError::InvalidArguments("shop_id is required".to_string()))?;
        if self.backend.shops.find_by_id(shop_id).await?.is_none() {
            return Err(ToolError::NotFound(format!("shop {shop_id} was not found")));
        }

        let query = ProductQuery {
            search: args::string(arguments, "category"),
            shop_id: Some(shop_id),
            page: PageRequest::new(1, SHOP_PRODUCTS_LIMIT),
            ..ProductQuery::default()
        };
        let page = self.backend.products.list(&query).await?;
        Ok(json!({
            "shopId": shop_id,
            "totalFound": page.total_count,
            "products": page
                .items
                .iter()
                .map(|product| json!({
                    "id": product.id,
                    "name": product.name,
                    "sellPrice": product.sell_price,
                    "unitOfPrice": product.unit_of_price.as_str(),
                    "description": product.description,
                }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn get_product_price(&self, arguments: &Value) -> Result<Value, ToolError> {
        let product_id = args::integer(arguments, "product_id")
            .map(ProductId)
            .ok_or_else(|| ToolError::InvalidArguments("product_id is required".to_string()))?;
        let product = self
            .backend
            .products
            .find_by_id(product_id)
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("product {product_id} was not found")))?;
        let shop = self
            .backend
            .shops
            .find_by_id(product.shop_id)
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("shop {} was not found", product.shop_id)))?;

        let resolution = self.backend.engine.resolve(&product, 1, shop.promo_strategy, self.backend.now());
        let promotions = promotions_behind(&product, &resolution);
        let names: Vec<&str> = promotions.iter().map(|promotion| promotion.name.as_str()).collect();
        let single = resolution.applied.as_ref();

        Ok(json!({
            "productId": product.id,
            "productName": product.name,
            "originalPrice": product.sell_price,
            "finalPrice": resolution.final_price.round_dp(2),
            "strategy": shop.promo_strategy.as_str(),
            "hasPromo": !promotions.is_empty(),
            "promoName": (!names.is_empty()).then(|| names.join(" + ")),
            "promoType": single.map(|promotion| promotion.promo_type().as_str()),
            "discount": single.and_then(|promotion| promotion.rule.discount_pct()),
        }))
    }

    async fn get_promotions_by_shop(&self, arguments: &Value) -> Result<Value, ToolError> {
        let shop_id = args::integer(arguments, "shop_id")
            .map(ShopId)
            .ok_or_else(|| ToolError::InvalidArguments("shop_id is required".to_string()))?;
        let now = self.backend.now();
        let products = self.backend.products.list_with_active_promotions(shop_id, now).await?;
        if products.is_empty() {
            return Ok(json!({"message": "No active promotion in this shop.", "promos": []}));
        }

        let mut entries: Vec<(Option<Decimal>, Value)> = products
            .iter()
            .flat_map(|product| {
                product.active_promotions(now).map(move |promotion| {
                    (promotion.rule.discount_pct(), promotion_entry(product, promotion))
                })
            })
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(json!({
            "totalPromos": entries.len(),
            "promos": entries.into_iter().map(|(_, entry)| entry).collect::<Vec<_>>(),
        }))
    }

    /// One entry per (product, active promotion), ranked by what the shop's
    /// strategy saves on a single unit.
    async fn search_best_promotions(&self, arguments: &Value) -> Result<Value, ToolError> {
        let needle = args::string(arguments, "query").map(|query| query.to_lowercase());
        let now = self.backend.now();
        let shops = self
            .backend
            .shops
            .list(&ShopQuery { page: PageRequest::new(1, PageRequest::MAX_PAGE_SIZE), ..ShopQuery::default() })
            .await?
            .items;

        let mut entries: Vec<(Decimal, Value)> = Vec::new();
        for shop in &shops {
            for product in self.backend.products.list_with_active_promotions(shop.id, now).await? {
                if needle.as_deref().is_some_and(|needle| !product.name.to_lowercase().contains(needle)) {
                    continue;
                }
                let resolution = self.backend.engine.resolve(&product, 1, shop.promo_strategy, now);
                let savings = product.sell_price - resolution.final_price;
                for promotion in product.active_promotions(now) {
                    let mut entry = promotion_entry(&product, promotion);
                    if let Value::Object(fields) = &mut entry {
                        fields.insert("shopName".to_string(), json!(shop.name));
                        fields.insert("shopStatus".to_string(), json!(shop.status.as_str()));
                        fields.insert("shopIsOpen".to_string(), json!(shop.is_open_at(now)));
                        fields.insert("finalPrice".to_string(), json!(resolution.final_price.round_dp(2)));
                        fields.insert("savings".to_string(), json!(savings.round_dp(2)));
                    }
                    entries.push((savings, entry));
                }
            }
        }

        if entries.is_empty() {
            return Ok(json!({"message": "No active promotion right now.", "promos": []}));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.truncate(BEST_PROMOTIONS_LIMIT);
        Ok(json!({
            "totalFound": entries.len(),
            "bestPromos": entries.into_iter().map(|(_, entry)| entry).collect::<Vec<_>>(),
        }))
    }

    /// Always the caller's own carts, whatever id the model passes.
    async fn get_cart(&self) -> Result<Value, ToolError> {
        let carts = self.backend.carts.list_carts(&self.caller).await?;
        if carts.is_empty() {
            return Ok(json!({"message": "No cart found.", "carts": []}));
        }
        Ok(json!({
            "totalCarts": carts.len(),
            "carts": carts
                .iter()
                .map(|cart| json!({
                    "id": cart.id,
                    "name": cart.name,
                    "totalAmount": cart.total_amount().round_dp(2),
                    "totalDiscount": cart.total_discount().round_dp(2),
                    "itemCount": cart.items.len(),
                    "items": cart.items.iter().map(|item| json!({
                        "productId": item.product_id,
                        "productName": item.product_name,
                        "shopName": item.shop_name,
                        "quantity": item.quantity,
                        "unitPrice": item.unit_price,
                        "lineTotal": item.final_price.round_dp(2),
                        "discount": item.discount().round_dp(2),
                        "appliedPromoName": item.promo.name,
                    })).collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>(),
        }))
    }

    fn propose_actions(&mut self, arguments: &Value) -> Result<Value, ToolError> {
        let actions = arguments
            .get("actions")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("actions must be an array".to_string()))?;

        let mut accepted = 0;
        let mut rejected = Vec::new();
        for raw in actions {
            match ProposalRequest::from_json(raw).review(&self.backend.guardrails) {
                Ok(action) => {
                    self.captured.push(action);
                    accepted += 1;
                }
                Err(decision) => {
                    let reason_code = decision.reason_code().unwrap_or("rejected");
                    debug!(
                        event_name = "agent.proposal.rejected",
                        user_id = %self.caller,
                        reason_code,
                        "proposal dropped by guardrails"
                    );
                    rejected.push(reason_code);
                }
            }
        }

        Ok(json!({
            "status": "proposed",
            "message": "Actions presented to the customer, awaiting confirmation.",
            "accepted": accepted,
            "rejected": rejected,
        }))
    }

    async fn shops_by_id(
        &self,
        ids: impl Iterator<Item = ShopId>,
    ) -> Result<HashMap<ShopId, Shop>, ToolError> {
        let mut shops = HashMap::new();
        for id in ids {
            if shops.contains_key(&id) {
                continue;
            }
            if let Some(shop) = self.backend.shops.find_by_id(id).await? {
                shops.insert(id, shop);
            }
        }
        Ok(shops)
    }
}

/// Scores candidates by how many query words appear in their name or
/// description, keeps those matching at least one, best first.
pub(crate) fn rank_by_keywords(candidates: Vec<Product>, words: &[String]) -> Vec<Product> {
    let mut scored: Vec<(usize, Product)> = candidates
        .into_iter()
        .map(|product| {
            let name = product.name.to_lowercase();
            let description = product.description.to_lowercase();
            let score = words
                .iter()
                .filter(|word| name.contains(word.as_str()) || description.contains(word.as_str()))
                .count();
            (score, product)
        })
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(SEARCH_RESULT_LIMIT).map(|(_, product)| product).collect()
}

fn promotions_behind<'a>(product: &'a Product, resolution: &'a PromoResolution) -> Vec<&'a Promotion> {
    match &resolution.applied {
        Some(applied) => vec![applied],
        None => product
            .promotions
            .iter()
            .filter(|promotion| resolution.stacked.contains(&promotion.id))
            .collect(),
    }
}

fn promotion_entry(product: &Product, promotion: &Promotion) -> Value {
    json!({
        "productId": product.id,
        "productName": product.name,
        "shopId": product.shop_id,
        "originalPrice": product.sell_price,
        "promoId": promotion.id,
        "promoName": promotion.name,
        "promoType": promotion.promo_type().as_str(),
        "discount": promotion.rule.discount_pct(),
        "buyQty": promotion.rule.buy_quantity(),
        "getQty": promotion.rule.get_quantity(),
        "endsAt": promotion.end_date,
    })
}

fn address_json(shop: &Shop) -> Value {
    match &shop.address {
        Some(address) => json!({
            "street": address.street,
            "city": address.city,
            "postalCode": address.postal_code,
            "country": address.country,
        }),
        None => Value::Null,
    }
}

fn shop_summary(shop: &Shop) -> Value {
    json!({
        "id": shop.id,
        "name": shop.name,
        "type": shop.shop_type.as_str(),
        "category": shop.category,
        "status": shop.status.as_str(),
        "address": address_json(shop),
    })
}

/// Lenient readers for model-supplied arguments. Blank strings count as absent
/// and numbers may arrive quoted.
pub(crate) mod args {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use serde_json::Value;

    pub(crate) fn string(arguments: &Value, key: &str) -> Option<String> {
        match arguments.get(key)? {
            Value::String(raw) => Some(raw.trim().to_string()).filter(|value| !value.is_empty()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    pub(crate) fn integer(arguments: &Value, key: &str) -> Option<i64> {
        match arguments.get(key)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().filter(|value| value.fract() == 0.0).map(|value| value as i64)),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn decimal(arguments: &Value, key: &str) -> Option<Decimal> {
        let raw = match arguments.get(key)? {
            Value::Number(number) => number.to_string(),
            Value::String(raw) => raw.trim().to_string(),
            _ => return None,
        };
        Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw)).ok()
    }
}
