use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use bazaar_core::domain::bill::{Bill, BillId, BillStatus, NewBill};
use bazaar_core::domain::product::{Product, ProductId};
use bazaar_core::domain::promotion::{Promotion, PromotionDraft, PromotionId, PromotionPatch};
use bazaar_core::domain::shop::{Shop, ShopId, ShopStatus};
use bazaar_core::domain::user::{Role, User, UserId};

pub mod bill;
pub mod memory;
pub mod product;
pub mod promotion;
pub mod query;
pub mod shop;
pub mod user;

pub use bill::SqlBillRepository;
pub use memory::{InMemoryBillRepository, InMemoryCatalog, InMemoryUserRepository};
pub use product::SqlProductRepository;
pub use promotion::SqlPromotionRepository;
pub use query::{Page, PageRequest, ProductQuery, ProductSort, ShopQuery};
pub use shop::SqlShopRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

#[async_trait]
pub trait ShopRepository: Send + Sync {
    async fn find_by_id(&self, id: ShopId) -> Result<Option<Shop>, RepositoryError>;
    async fn list(&self, query: &ShopQuery) -> Result<Page<Shop>, RepositoryError>;
    async fn save(&self, shop: Shop) -> Result<(), RepositoryError>;
    async fn delete(&self, id: ShopId) -> Result<bool, RepositoryError>;

    /// Shops matching `filter` that have Open status and a schedule covering `now`.
    async fn list_open(
        &self,
        now: DateTime<Utc>,
        filter: ShopQuery,
    ) -> Result<Page<Shop>, RepositoryError> {
        self.list(&ShopQuery { status: Some(ShopStatus::Open), open_at: Some(now), ..filter }).await
    }
}

/// Products are always returned with every promotion linked to them, active or not.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn list(&self, query: &ProductQuery) -> Result<Page<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError>;

    async fn list_with_active_promotions(
        &self,
        shop_id: ShopId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Product>, RepositoryError> {
        let query = ProductQuery {
            shop_id: Some(shop_id),
            active_promotion_at: Some(now),
            page: PageRequest::new(1, PageRequest::MAX_PAGE_SIZE),
            ..ProductQuery::default()
        };
        Ok(self.list(&query).await?.items)
    }
}

#[async_trait]
pub trait PromotionRepository: Send + Sync {
    async fn find_by_id(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError>;
    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Promotion>, RepositoryError>;
    async fn create(
        &self,
        shop_id: ShopId,
        draft: PromotionDraft,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError>;
    async fn update(
        &self,
        id: PromotionId,
        patch: PromotionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Promotion>, RepositoryError>;
    async fn delete(&self, id: PromotionId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BillRepository: Send + Sync {
    /// Persists the bill and its items atomically and returns it with its id.
    async fn create(&self, bill: NewBill) -> Result<Bill, RepositoryError>;
    /// All-or-nothing: when one bill fails none of them is stored.
    async fn create_all(&self, bills: Vec<NewBill>) -> Result<Vec<Bill>, RepositoryError>;
    async fn find_by_id(&self, id: BillId) -> Result<Option<Bill>, RepositoryError>;
    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Bill>, RepositoryError>;
    async fn list_by_status(
        &self,
        shop_id: ShopId,
        status: BillStatus,
    ) -> Result<Vec<Bill>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Fails with `Constraint` when the email is already registered.
    async fn insert(&self, user: User) -> Result<(), RepositoryError>;
    async fn add_role(&self, id: &UserId, role: Role) -> Result<(), RepositoryError>;
}

/// Fixed-width UTC timestamps so lexical order in SQLite matches time order.
pub(crate) fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
