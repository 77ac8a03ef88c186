//! Cart endpoints for direct (non-chat) clients.
//!
//! - `GET    /carts`                           list the caller's carts
//! - `POST   /carts`                           create a cart
//! - `GET    /carts/{id}`                      one cart
//! - `PATCH  /carts/{id}/rename`               rename
//! - `DELETE /carts/{id}`                      delete
//! - `POST   /carts/{id}/items`                add a product (`new` creates a dated cart first)
//! - `PUT    /carts/{id}/items/{productId}`    set a line quantity, zero removes it
//! - `DELETE /carts/{id}/items/{productId}`    remove a line
//! - `POST   /carts/{id}/checkout`             one bill per shop, then the cart is gone

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use bazaar_core::domain::bill::{BillId, BillNumber, GuestContact};
use bazaar_core::domain::cart::{Cart, CartId, CartItem, MAX_LINE_QUANTITY};
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::promotion::PromotionId;
use bazaar_core::domain::shop::ShopId;
use bazaar_db::cart::{default_cart_name, CheckoutReceipt};

use crate::app::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

const NEW_CART: &str = "new";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub product_id: ProductId,
    pub product_name: String,
    pub shop_id: ShopId,
    pub shop_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub final_price: Decimal,
    pub discount: Decimal,
    pub promotion_id: Option<PromotionId>,
    pub promo_name: Option<String>,
    pub promo_type: Option<&'static str>,
}

impl From<&CartItem> for CartItemView {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            shop_id: item.shop_id,
            shop_name: item.shop_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            final_price: item.final_price,
            discount: item.discount(),
            promotion_id: item.promo.promotion_id,
            promo_name: item.promo.name.clone(),
            promo_type: item.promo.promo_type.map(|promo_type| promo_type.as_str()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: CartId,
    pub name: String,
    pub items: Vec<CartItemView>,
    pub total_before_discount: Decimal,
    pub total_discount: Decimal,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id.clone(),
            name: cart.name.clone(),
            items: cart.items.iter().map(CartItemView::from).collect(),
            total_before_discount: cart.total_before_discount(),
            total_discount: cart.total_discount(),
            total_amount: cart.total_amount(),
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillView {
    pub bill_id: BillId,
    pub number: BillNumber,
    pub shop_id: ShopId,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub cart_id: CartId,
    pub bill_id: Option<BillId>,
    pub bills: Vec<BillView>,
}

impl From<CheckoutReceipt> for CheckoutView {
    fn from(receipt: CheckoutReceipt) -> Self {
        Self {
            bill_id: receipt.last_bill_id(),
            cart_id: receipt.cart_id,
            bills: receipt
                .bills
                .into_iter()
                .map(|bill| BillView {
                    bill_id: bill.bill_id,
                    number: bill.number,
                    shop_id: bill.shop_id,
                    total_amount: bill.total_amount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCartRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameCartRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCheckoutRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub street: String,
    pub city: String,
    pub zip_code: String,
    pub country: String,
}

impl From<GuestCheckoutRequest> for GuestContact {
    fn from(request: GuestCheckoutRequest) -> Self {
        Self {
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            phone: request.phone,
            street: request.street,
            city: request.city,
            zip_code: request.zip_code,
            country: request.country,
        }
    }
}

/// An empty body is `None`; anything else must be valid JSON for `T`.
fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|error| ApiError::bad_request(format!("invalid request body: {error}")))
}

fn respond<T: Serialize>(state: &AppState, caller: &Caller, status: StatusCode, body: T) -> Response {
    caller.attach_cookie(&state.guest_cookie, (status, Json(body)).into_response())
}

pub async fn list_carts(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let carts = state.carts.list_carts(&caller.user_id).await?;
    let views: Vec<CartView> = carts.iter().map(CartView::from).collect();
    Ok(respond(&state, &caller, StatusCode::OK, views))
}

pub async fn create_cart(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = optional_json::<CreateCartRequest>(&body)?.unwrap_or_default();
    let name = match request.name {
        Some(name) if name.trim().is_empty() => {
            return Err(ApiError::bad_request("cart name must not be blank"))
        }
        Some(name) => name,
        None => default_cart_name(Utc::now()),
    };
    let cart = state.carts.create_cart(&caller.user_id, &name).await?;
    Ok(respond(&state, &caller, StatusCode::CREATED, CartView::from(&cart)))
}

pub async fn get_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(cart_id): Path<String>,
) -> Result<Response, ApiError> {
    let cart = state.carts.get_cart(&caller.user_id, &CartId(cart_id)).await?;
    Ok(respond(&state, &caller, StatusCode::OK, CartView::from(&cart)))
}

pub async fn rename_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(cart_id): Path<String>,
    Json(request): Json<RenameCartRequest>,
) -> Result<Response, ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("cart name must not be blank"));
    }
    let cart = state.carts.rename_cart(&caller.user_id, &CartId(cart_id), &request.name).await?;
    Ok(respond(&state, &caller, StatusCode::OK, CartView::from(&cart)))
}

pub async fn delete_cart(
    State(state): State<AppState>,
    caller: Caller,
    Path(cart_id): Path<String>,
) -> Result<Response, ApiError> {
    state.carts.delete_cart(&caller.user_id, &CartId(cart_id)).await?;
    Ok(caller.attach_cookie(&state.guest_cookie, StatusCode::NO_CONTENT.into_response()))
}

pub async fn add_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(cart_id): Path<String>,
    Json(request): Json<AddItemRequest>,
) -> Result<Response, ApiError> {
    let quantity = u32::try_from(request.quantity)
        .ok()
        .filter(|quantity| (1..=MAX_LINE_QUANTITY).contains(quantity))
        .ok_or_else(|| {
            ApiError::bad_request(format!("quantity must be between 1 and {MAX_LINE_QUANTITY}"))
        })?;

    let cart_id = if cart_id.eq_ignore_ascii_case(NEW_CART) {
        state.carts.create_cart(&caller.user_id, &default_cart_name(Utc::now())).await?.id
    } else {
        CartId(cart_id)
    };
    let cart = state.carts.add_item(&caller.user_id, &cart_id, request.product_id, quantity).await?;
    Ok(respond(&state, &caller, StatusCode::OK, CartView::from(&cart)))
}

pub async fn update_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((cart_id, product_id)): Path<(String, i64)>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Response, ApiError> {
    let quantity = u32::try_from(request.quantity)
        .ok()
        .filter(|quantity| *quantity <= MAX_LINE_QUANTITY)
        .ok_or_else(|| {
            ApiError::bad_request(format!("quantity must be between 0 and {MAX_LINE_QUANTITY}"))
        })?;
    let cart = state
        .carts
        .update_item_quantity(&caller.user_id, &CartId(cart_id), ProductId(product_id), quantity)
        .await?;
    Ok(respond(&state, &caller, StatusCode::OK, CartView::from(&cart)))
}

pub async fn remove_item(
    State(state): State<AppState>,
    caller: Caller,
    Path((cart_id, product_id)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    let cart =
        state.carts.remove_item(&caller.user_id, &CartId(cart_id), ProductId(product_id)).await?;
    Ok(respond(&state, &caller, StatusCode::OK, CartView::from(&cart)))
}

/// Signed-in callers check out as themselves; guests must send contact details.
pub async fn checkout(
    State(state): State<AppState>,
    caller: Caller,
    Path(cart_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let guest = if caller.authenticated {
        None
    } else {
        let request = optional_json::<GuestCheckoutRequest>(&body)?.ok_or_else(|| {
            ApiError::bad_request(
                "guest checkout requires email, first and last name, and a full address",
            )
        })?;
        Some(GuestContact::from(request))
    };
    let receipt = state.carts.checkout(&caller.user_id, &CartId(cart_id), guest).await?;
    Ok(respond(&state, &caller, StatusCode::OK, CheckoutView::from(receipt)))
}
