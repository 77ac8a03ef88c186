use sqlx::{QueryBuilder, Row, Sqlite};

use bazaar_core::domain::product::{Product, ProductId, UnitOfPrice};
use bazaar_core::domain::shop::ShopId;

use super::promotion::promotions_for_product;
use super::query::{Page, ProductQuery};
use super::{decode_decimal, decode_err, decode_ts, encode_ts, ProductRepository, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "p.id, p.shop_id, p.name, p.description, p.sell_price,
    p.unit_of_price, p.barcode, p.created_at, p.updated_at";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
        let mut product = row_to_product(row)?;
        product.promotions = promotions_for_product(&self.pool, product.id).await?;
        Ok(product)
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let shop_id: i64 = row.try_get("shop_id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let description: String = row.try_get("description").map_err(decode_err)?;
    let sell_price: String = row.try_get("sell_price").map_err(decode_err)?;
    let unit_of_price: String = row.try_get("unit_of_price").map_err(decode_err)?;
    let barcode: Option<String> = row.try_get("barcode").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let unit_of_price = UnitOfPrice::parse(&unit_of_price)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown unit `{unit_of_price}`")))?;

    Ok(Product {
        id: ProductId(id),
        shop_id: ShopId(shop_id),
        name,
        description,
        sell_price: decode_decimal("sell_price", &sell_price)?,
        unit_of_price,
        barcode,
        promotions: Vec::new(),
        created_at: decode_ts("created_at", &created_at)?,
        updated_at: decode_ts("updated_at", &updated_at)?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ProductQuery) {
    builder.push(" WHERE 1=1");
    if let Some(pattern) = query.search_pattern() {
        builder.push(" AND p.search_text LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\'");
    }
    if let Some(shop_id) = query.shop_id {
        builder.push(" AND p.shop_id = ");
        builder.push_bind(shop_id.0);
    }
    if let Some(min_price) = query.min_price {
        builder.push(" AND CAST(p.sell_price AS REAL) >= CAST(");
        builder.push_bind(min_price.to_string());
        builder.push(" AS REAL)");
    }
    if let Some(max_price) = query.max_price {
        builder.push(" AND CAST(p.sell_price AS REAL) <= CAST(");
        builder.push_bind(max_price.to_string());
        builder.push(" AS REAL)");
    }
    if let Some(now) = query.active_promotion_at {
        let now = encode_ts(now);
        builder.push(
            " AND EXISTS (SELECT 1 FROM promotion_products pp
                          JOIN promotions pr ON pr.id = pp.promotion_id
                          WHERE pp.product_id = p.id AND pr.is_active = 1 AND pr.start_date <= ",
        );
        builder.push_bind(now.clone());
        builder.push(" AND pr.end_date >= ");
        builder.push_bind(now);
        builder.push(")");
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &ProductQuery) -> Result<Page<Product>, RepositoryError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM products p");
        push_filters(&mut count, query);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("count")?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products p"));
        push_filters(&mut select, query);
        select.push(query.sort.order_by_sql());
        select.push(" LIMIT ");
        select.push_bind(i64::from(query.page.limit()));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            products.push(self.hydrate(row).await?);
        }
        Ok(Page::new(products, query.page, u64::try_from(total).unwrap_or_default()))
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO products (id, shop_id, name, description, search_text, sell_price,
                                   unit_of_price, barcode, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 shop_id = excluded.shop_id,
                 name = excluded.name,
                 description = excluded.description,
                 search_text = excluded.search_text,
                 sell_price = excluded.sell_price,
                 unit_of_price = excluded.unit_of_price,
                 barcode = excluded.barcode,
                 updated_at = excluded.updated_at",
        )
        .bind(product.id.0)
        .bind(product.shop_id.0)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.search_text())
        .bind(product.sell_price.to_string())
        .bind(product.unit_of_price.as_str())
        .bind(&product.barcode)
        .bind(encode_ts(product.created_at))
        .bind(encode_ts(product.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM products WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
    use rust_decimal::Decimal;

    use bazaar_core::domain::product::{Product, ProductId, UnitOfPrice};
    use bazaar_core::domain::promotion::{PromotionDraft, PromotionPatch, PromotionRule};
    use bazaar_core::domain::shop::{
        PromoStrategy, Schedule, Shop, ShopAddress, ShopId, ShopStatus, ShopType,
    };
    use bazaar_core::domain::user::UserId;

    use super::SqlProductRepository;
    use crate::repositories::{
        PageRequest, ProductQuery, ProductRepository, ProductSort, PromotionRepository,
        RepositoryError, ShopQuery, ShopRepository, SqlPromotionRepository, SqlShopRepository,
    };
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).single().expect("valid date")
    }

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal")
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn shop(id: i64, name: &str, city: &str, status: ShopStatus) -> Shop {
        Shop {
            id: ShopId(id),
            name: name.to_string(),
            owner_id: UserId("owner-1".to_string()),
            status,
            shop_type: ShopType::Physical,
            category: Some("Grocery".to_string()),
            address: Some(ShopAddress {
                street: "1 Rue Neuve".to_string(),
                city: city.to_string(),
                postal_code: "69001".to_string(),
                country: "France".to_string(),
            }),
            promo_strategy: PromoStrategy::BestForClient,
            schedule: vec![Schedule::open(Weekday::Sat, hm(8, 0), hm(19, 0))],
            created_at: now(),
            updated_at: now(),
        }
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn product(id: i64, shop_id: i64, name: &str, price: &str) -> Product {
        Product {
            id: ProductId(id),
            shop_id: ShopId(shop_id),
            name: name.to_string(),
            description: format!("Fresh {}", name.to_lowercase()),
            sell_price: dec(price),
            unit_of_price: UnitOfPrice::Unit,
            barcode: None,
            promotions: Vec::new(),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn percentage_draft(name: &str, pct: &str, product_ids: Vec<ProductId>) -> PromotionDraft {
        PromotionDraft {
            name: name.to_string(),
            description: None,
            rule: PromotionRule::Percentage { discount_pct: dec(pct) },
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(1),
            is_active: true,
            product_ids,
        }
    }

    async fn seeded() -> (DbPool, SqlShopRepository, SqlProductRepository, SqlPromotionRepository)
    {
        let pool = pool().await;
        let shops = SqlShopRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let promotions = SqlPromotionRepository::new(pool.clone());

        shops.save(shop(1, "Primeur Lumière", "Lyon", ShopStatus::Open)).await.expect("shop 1");
        shops.save(shop(2, "Boulangerie Sud", "Marseille", ShopStatus::Closed)).await.expect("shop 2");
        products.save(product(10, 1, "Apple", "3.00")).await.expect("apple");
        products.save(product(11, 1, "Banana", "1.50")).await.expect("banana");
        products.save(product(12, 2, "Baguette", "1.10")).await.expect("baguette");
        (pool, shops, products, promotions)
    }

    #[tokio::test]
    async fn shop_listing_filters_by_city_and_status() {
        let (_pool, shops, _, _) = seeded().await;

        let lyon = ShopQuery { city: Some("lyon".to_string()), ..ShopQuery::default() };
        let page = ShopRepository::list(&shops, &lyon).await.expect("list");
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].name, "Primeur Lumière");
        assert_eq!(page.items[0].city(), Some("Lyon"));

        let open = shops.list_open(now(), ShopQuery::default()).await.expect("open shops");
        assert_eq!(open.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ShopId(1)]);
    }

    #[tokio::test]
    async fn open_status_shops_outside_their_hours_are_not_listed_as_open() {
        let (_pool, shops, _, _) = seeded().await;
        let mut sunday_only = shop(3, "Marché du Dimanche", "Lyon", ShopStatus::Open);
        sunday_only.schedule = vec![
            Schedule::open(Weekday::Sun, hm(7, 0), hm(13, 0)),
            Schedule { is_closed: true, ..Schedule::open(Weekday::Sat, hm(8, 0), hm(19, 0)) },
        ];
        shops.save(sunday_only).await.expect("shop 3");

        let stored = ShopRepository::find_by_id(&shops, ShopId(3)).await.expect("find").expect("shop");
        assert_eq!(stored.schedule.len(), 2);
        assert_eq!(stored.schedule[0].day, Weekday::Sat);
        assert!(stored.schedule[0].is_closed);
        assert!(!stored.is_open_at(now()));

        let open = shops.list_open(now(), ShopQuery::default()).await.expect("saturday");
        assert_eq!(open.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ShopId(1)]);

        let evening = now() + Duration::hours(10);
        let open = shops.list_open(evening, ShopQuery::default()).await.expect("evening");
        assert!(open.items.is_empty());

        let sunday_morning = now() + Duration::hours(24);
        let open = shops.list_open(sunday_morning, ShopQuery::default()).await.expect("sunday");
        assert_eq!(open.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ShopId(3)]);
    }

    #[tokio::test]
    async fn search_folds_accented_capitals_and_treats_wildcards_literally() {
        let (_pool, shops, products, _) = seeded().await;
        let mut eclair = product(13, 2, "Éclair au café", "2.80");
        eclair.description = "Choux pastry".to_string();
        products.save(eclair).await.expect("eclair");
        products.save(product(14, 2, "Tarte 100% pomme", "3.20")).await.expect("tarte");

        for needle in ["éclair", "Éclair", "ÉCLAIR AU CAFÉ"] {
            let query = ProductQuery { search: Some(needle.to_string()), ..ProductQuery::default() };
            let page = ProductRepository::list(&products, &query).await.expect("search");
            let ids: Vec<_> = page.items.iter().map(|p| p.id).collect();
            assert_eq!(ids, vec![ProductId(13)], "needle {needle}");
        }

        let percent = ProductQuery { search: Some("100%".to_string()), ..ProductQuery::default() };
        let page = ProductRepository::list(&products, &percent).await.expect("percent");
        assert_eq!(page.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![ProductId(14)]);

        let underscore = ProductQuery { search: Some("_".to_string()), ..ProductQuery::default() };
        assert_eq!(ProductRepository::list(&products, &underscore).await.expect("_").total_count, 0);

        let by_name = ShopQuery { name: Some("PRIMEUR LUMIÈRE".to_string()), ..ShopQuery::default() };
        let page = ShopRepository::list(&shops, &by_name).await.expect("shop search");
        assert_eq!(page.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ShopId(1)]);
    }

    #[tokio::test]
    async fn shop_city_and_category_filters_fold_accented_capitals() {
        let (_pool, shops, _, _) = seeded().await;
        let mut evry = shop(4, "Fromagerie", "Évry", ShopStatus::Open);
        evry.category = Some("Épicerie fine".to_string());
        shops.save(evry).await.expect("shop 4");

        for city in ["Évry", "évry", " ÉVRY "] {
            let query = ShopQuery { city: Some(city.to_string()), ..ShopQuery::default() };
            let page = ShopRepository::list(&shops, &query).await.expect("city");
            let ids: Vec<_> = page.items.iter().map(|s| s.id).collect();
            assert_eq!(ids, vec![ShopId(4)], "city {city}");
        }

        let category = ShopQuery {
            city: Some("évry".to_string()),
            category: Some("ÉPICERIE FINE".to_string()),
            ..ShopQuery::default()
        };
        assert_eq!(ShopRepository::list(&shops, &category).await.expect("category").total_count, 1);

        let open = shops
            .list_open(now(), ShopQuery { city: Some("Évry".to_string()), ..ShopQuery::default() })
            .await
            .expect("open in evry");
        assert_eq!(open.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ShopId(4)]);
    }

    #[tokio::test]
    async fn product_search_matches_description_and_sorts_by_price() {
        let (_pool, _, products, _) = seeded().await;

        let query = ProductQuery {
            search: Some("FRESH".to_string()),
            sort: ProductSort::PriceDesc,
            page: PageRequest::new(1, 2),
            ..ProductQuery::default()
        };
        let page = ProductRepository::list(&products, &query).await.expect("list");
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "Apple");
        assert_eq!(page.items[1].name, "Banana");
        assert!(page.has_next());

        let cheap = ProductQuery {
            max_price: Some(dec("1.50")),
            sort: ProductSort::PriceAsc,
            ..ProductQuery::default()
        };
        let page = ProductRepository::list(&products, &cheap).await.expect("cheap");
        assert_eq!(page.items.iter().map(|p| p.id.0).collect::<Vec<_>>(), vec![12, 11]);
    }

    #[tokio::test]
    async fn products_read_back_with_linked_promotions() {
        let (_pool, _, products, promotions) = seeded().await;

        let created = promotions
            .create(ShopId(1), percentage_draft("Spring", "20", vec![ProductId(10)]), now())
            .await
            .expect("create promotion");

        let apple = ProductRepository::find_by_id(&products, ProductId(10))
            .await
            .expect("find")
            .expect("apple exists");
        assert_eq!(apple.promotions.len(), 1);
        assert_eq!(apple.promotions[0].id, created.id);
        assert!(apple.has_active_promotion(now()));

        let promoted = products
            .list_with_active_promotions(ShopId(1), now())
            .await
            .expect("active promotions");
        assert_eq!(promoted.iter().map(|p| p.id).collect::<Vec<_>>(), vec![ProductId(10)]);

        let later = products
            .list_with_active_promotions(ShopId(1), now() + Duration::days(5))
            .await
            .expect("expired promotions");
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn promotion_update_relinks_products_and_revalidates() {
        let (_pool, _, products, promotions) = seeded().await;
        let created = promotions
            .create(ShopId(1), percentage_draft("Spring", "20", vec![ProductId(10)]), now())
            .await
            .expect("create");

        let patch = PromotionPatch {
            product_ids: Some(vec![ProductId(11)]),
            ..PromotionPatch::default()
        };
        let updated = promotions
            .update(created.id, patch, now())
            .await
            .expect("update")
            .expect("promotion exists");
        assert_eq!(updated.product_ids, vec![ProductId(11)]);

        let apple = ProductRepository::find_by_id(&products, ProductId(10))
            .await
            .expect("find")
            .expect("apple");
        assert!(apple.promotions.is_empty());

        let invalid = PromotionPatch {
            end_date: Some(now() - Duration::days(3)),
            ..PromotionPatch::default()
        };
        let error = promotions.update(created.id, invalid, now()).await.expect_err("invalid window");
        assert!(matches!(error, RepositoryError::Constraint(_)));

        assert!(PromotionRepository::delete(&promotions, created.id).await.expect("delete"));
        assert!(promotions.list_by_shop(ShopId(1)).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn deleting_a_shop_cascades_to_its_products() {
        let (_pool, shops, products, _) = seeded().await;

        assert!(ShopRepository::delete(&shops, ShopId(2)).await.expect("delete shop"));
        assert!(ProductRepository::find_by_id(&products, ProductId(12))
            .await
            .expect("find")
            .is_none());
        assert!(!ShopRepository::delete(&shops, ShopId(2)).await.expect("second delete"));
    }
}
