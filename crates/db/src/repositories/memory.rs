use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use bazaar_core::domain::bill::{Bill, BillId, BillStatus, NewBill};
use bazaar_core::domain::product::{fold_for_search, Product, ProductId};
use bazaar_core::domain::promotion::{Promotion, PromotionDraft, PromotionId, PromotionPatch};
use bazaar_core::domain::shop::{Shop, ShopId};
use bazaar_core::domain::user::{Role, User, UserId};

use super::query::{Page, ProductQuery, ProductSort, ShopQuery};
use super::{
    BillRepository, ProductRepository, PromotionRepository, RepositoryError, ShopRepository,
    UserRepository,
};

/// Shops, products and promotions behind one set of locks, so products read
/// back with their promotion links the same way the SQL store joins them.
#[derive(Default)]
pub struct InMemoryCatalog {
    shops: RwLock<BTreeMap<ShopId, Shop>>,
    products: RwLock<BTreeMap<ProductId, Product>>,
    promotions: RwLock<BTreeMap<PromotionId, Promotion>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(mut product: Product, promotions: &BTreeMap<PromotionId, Promotion>) -> Product {
        product.promotions = promotions
            .values()
            .filter(|promotion| promotion.applies_to(product.id))
            .cloned()
            .collect();
        product
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

#[async_trait::async_trait]
impl ShopRepository for InMemoryCatalog {
    async fn find_by_id(&self, id: ShopId) -> Result<Option<Shop>, RepositoryError> {
        let shops = self.shops.read().await;
        Ok(shops.get(&id).cloned())
    }

    async fn list(&self, query: &ShopQuery) -> Result<Page<Shop>, RepositoryError> {
        let shops = self.shops.read().await;
        let mut matching: Vec<Shop> = shops
            .values()
            .filter(|shop| {
                query.name.as_deref().map_or(true, |name| contains_ci(&shop.name, name))
            })
            .filter(|shop| {
                query.city.as_deref().map_or(true, |city| {
                    shop.city().is_some_and(|shop_city| {
                        fold_for_search(shop_city) == fold_for_search(city)
                    })
                })
            })
            .filter(|shop| query.shop_type.map_or(true, |shop_type| shop.shop_type == shop_type))
            .filter(|shop| {
                query.category.as_deref().map_or(true, |category| {
                    shop.category
                        .as_deref()
                        .is_some_and(|value| fold_for_search(value) == fold_for_search(category))
                })
            })
            .filter(|shop| query.status.map_or(true, |status| shop.status == status))
            .filter(|shop| query.open_at.map_or(true, |now| shop.is_open_at(now)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id))
        });
        Ok(Page::from_all(matching, query.page))
    }

    async fn save(&self, shop: Shop) -> Result<(), RepositoryError> {
        let mut shops = self.shops.write().await;
        shops.insert(shop.id, shop);
        Ok(())
    }

    async fn delete(&self, id: ShopId) -> Result<bool, RepositoryError> {
        let mut shops = self.shops.write().await;
        Ok(shops.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryCatalog {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        let promotions = self.promotions.read().await;
        Ok(products.get(&id).cloned().map(|product| Self::attach(product, &promotions)))
    }

    async fn list(&self, query: &ProductQuery) -> Result<Page<Product>, RepositoryError> {
        let products = self.products.read().await;
        let promotions = self.promotions.read().await;
        let search = query.search.as_deref().map(str::trim).filter(|value| !value.is_empty());

        let mut matching: Vec<Product> = products
            .values()
            .cloned()
            .map(|product| Self::attach(product, &promotions))
            .filter(|product| search.map_or(true, |needle| product.matches_text(needle)))
            .filter(|product| query.shop_id.map_or(true, |shop_id| product.shop_id == shop_id))
            .filter(|product| query.min_price.map_or(true, |min| product.sell_price >= min))
            .filter(|product| query.max_price.map_or(true, |max| product.sell_price <= max))
            .filter(|product| {
                query.active_promotion_at.map_or(true, |now| product.has_active_promotion(now))
            })
            .collect();

        matching.sort_by(|a, b| {
            let primary = match query.sort {
                ProductSort::NameAsc => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                ProductSort::NameDesc => b.name.to_lowercase().cmp(&a.name.to_lowercase()),
                ProductSort::PriceAsc => a.sell_price.cmp(&b.sell_price),
                ProductSort::PriceDesc => b.sell_price.cmp(&a.sell_price),
                ProductSort::CreatedAsc => a.created_at.cmp(&b.created_at),
                ProductSort::CreatedDesc => b.created_at.cmp(&a.created_at),
            };
            primary.then(a.id.cmp(&b.id))
        });

        Ok(Page::from_all(matching, query.page))
    }

    async fn save(&self, mut product: Product) -> Result<(), RepositoryError> {
        product.promotions.clear();
        let mut products = self.products.write().await;
        products.insert(product.id, product);
        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let mut products = self.products.write().await;
        let removed = products.remove(&id).is_some();
        if removed {
            let mut promotions = self.promotions.write().await;
            for promotion in promotions.values_mut() {
                promotion.product_ids.retain(|product_id| *product_id != id);
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl PromotionRepository for InMemoryCatalog {
    async fn find_by_id(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError> {
        let promotions = self.promotions.read().await;
        Ok(promotions.get(&id).cloned())
    }

    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Promotion>, RepositoryError> {
        let promotions = self.promotions.read().await;
        Ok(promotions.values().filter(|promotion| promotion.shop_id == shop_id).cloned().collect())
    }

    async fn create(
        &self,
        shop_id: ShopId,
        draft: PromotionDraft,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        let mut promotions = self.promotions.write().await;
        let next_id = promotions.keys().next_back().map_or(1, |last| last.0 + 1);
        let promotion = draft
            .into_promotion(PromotionId(next_id), shop_id, now)
            .map_err(|error| RepositoryError::Constraint(error.to_string()))?;
        promotions.insert(promotion.id, promotion.clone());
        Ok(promotion)
    }

    async fn update(
        &self,
        id: PromotionId,
        patch: PromotionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Promotion>, RepositoryError> {
        let mut promotions = self.promotions.write().await;
        let Some(current) = promotions.get(&id) else {
            return Ok(None);
        };
        let updated = patch
            .apply_to(current, now)
            .map_err(|error| RepositoryError::Constraint(error.to_string()))?;
        promotions.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, id: PromotionId) -> Result<bool, RepositoryError> {
        let mut promotions = self.promotions.write().await;
        Ok(promotions.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryBillRepository {
    bills: RwLock<Vec<Bill>>,
}

impl InMemoryBillRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BillRepository for InMemoryBillRepository {
    async fn create(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        let mut created = self.create_all(vec![bill]).await?;
        created.pop().ok_or_else(|| RepositoryError::Constraint("no bill was stored".to_string()))
    }

    async fn create_all(&self, new_bills: Vec<NewBill>) -> Result<Vec<Bill>, RepositoryError> {
        let mut bills = self.bills.write().await;
        for (index, bill) in new_bills.iter().enumerate() {
            if bill.items.is_empty() {
                return Err(RepositoryError::Constraint(
                    "a bill needs at least one item".to_string(),
                ));
            }
            let taken = bills.iter().any(|existing| existing.number == bill.number)
                || new_bills[..index].iter().any(|earlier| earlier.number == bill.number);
            if taken {
                return Err(RepositoryError::Constraint(format!(
                    "bill number {} already exists",
                    bill.number
                )));
            }
        }
        let first_id = bills.len() as i64 + 1;
        let stored: Vec<Bill> = new_bills
            .into_iter()
            .enumerate()
            .map(|(offset, bill)| bill.with_id(BillId(first_id + offset as i64)))
            .collect();
        bills.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn find_by_id(&self, id: BillId) -> Result<Option<Bill>, RepositoryError> {
        let bills = self.bills.read().await;
        Ok(bills.iter().find(|bill| bill.id == id).cloned())
    }

    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Bill>, RepositoryError> {
        let bills = self.bills.read().await;
        Ok(bills.iter().filter(|bill| bill.shop_id == shop_id).cloned().collect())
    }

    async fn list_by_status(
        &self,
        shop_id: ShopId,
        status: BillStatus,
    ) -> Result<Vec<Bill>, RepositoryError> {
        let bills = self.bills.read().await;
        Ok(bills
            .iter()
            .filter(|bill| bill.shop_id == shop_id && bill.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email.eq_ignore_ascii_case(email.trim())).cloned())
    }

    async fn insert(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email.eq_ignore_ascii_case(&user.email)) {
            return Err(RepositoryError::Constraint(format!(
                "email {} is already registered",
                user.email
            )));
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn add_role(&self, id: &UserId, role: Role) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(id) {
            if !user.has_role(role) {
                user.roles.push(role);
            }
        }
        Ok(())
    }
}
