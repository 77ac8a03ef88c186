use sqlx::migrate::{MigrateError, Migrator};
use sqlx::Row;
use tracing::info;

use bazaar_core::domain::product::{fold_for_search, product_search_text};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    refold_search_columns(pool).await.map_err(MigrateError::Execute)
}

/// Rewrites folded search columns whose stored value differs from the Unicode
/// fold. SQL backfills fold ASCII only, so rows that predate a search column
/// are corrected here.
async fn refold_search_columns(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut refolded = 0_usize;

    let shops = sqlx::query(
        "SELECT id, name, name_search, city, city_search, category, category_search FROM shops",
    )
    .fetch_all(&mut *tx)
    .await?;
    for row in &shops {
        let folded = (
            fold_for_search(&row.try_get::<String, _>("name")?),
            row.try_get::<Option<String>, _>("city")?.as_deref().map(fold_for_search),
            row.try_get::<Option<String>, _>("category")?.as_deref().map(fold_for_search),
        );
        let stored = (
            row.try_get::<String, _>("name_search")?,
            row.try_get::<Option<String>, _>("city_search")?,
            row.try_get::<Option<String>, _>("category_search")?,
        );
        if folded == stored {
            continue;
        }
        sqlx::query(
            "UPDATE shops SET name_search = ?, city_search = ?, category_search = ? WHERE id = ?",
        )
        .bind(folded.0)
        .bind(folded.1)
        .bind(folded.2)
        .bind(row.try_get::<i64, _>("id")?)
        .execute(&mut *tx)
        .await?;
        refolded += 1;
    }

    let products = sqlx::query("SELECT id, name, description, search_text FROM products")
        .fetch_all(&mut *tx)
        .await?;
    for row in &products {
        let folded = product_search_text(
            &row.try_get::<String, _>("name")?,
            &row.try_get::<String, _>("description")?,
        );
        if folded == row.try_get::<String, _>("search_text")? {
            continue;
        }
        sqlx::query("UPDATE products SET search_text = ? WHERE id = ?")
            .bind(folded)
            .bind(row.try_get::<i64, _>("id")?)
            .execute(&mut *tx)
            .await?;
        refolded += 1;
    }

    tx.commit().await?;
    if refolded > 0 {
        info!(event_name = "db.search.refolded", rows = refolded, "search columns re-folded");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::repositories::{
        ProductQuery, ProductRepository, ShopQuery, ShopRepository, SqlProductRepository,
        SqlShopRepository,
    };
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "users",
        "user_roles",
        "shops",
        "products",
        "promotions",
        "promotion_products",
        "bills",
        "bill_items",
        "shop_schedules",
        "idx_products_shop_id",
        "idx_promotions_shop_id",
        "idx_promotion_products_product_id",
        "idx_bills_shop_status",
        "idx_bill_items_bill_id",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_catalog_and_billing_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let tables =
            ["users", "user_roles", "shops", "shop_schedules", "products", "promotions", "bills"];
        for table in tables {
            assert_eq!(table_count(&pool, table).await, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn promotion_rows_must_carry_their_rule_parameters() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        sqlx::query(
            "INSERT INTO shops (id, name, owner_id, created_at, updated_at)
             VALUES (1, 'Primeur', 'owner-1', '2026-01-01T00:00:00.000000Z',
                     '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .expect("insert shop");

        let missing_pct = sqlx::query(
            "INSERT INTO promotions (shop_id, name, promo_type, start_date, end_date,
                                     created_at, updated_at)
             VALUES (1, 'Broken', 'percentage', '2026-01-01T00:00:00.000000Z',
                     '2026-02-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z',
                     '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await;
        assert!(missing_pct.is_err(), "percentage promotion without a discount must be rejected");

        let inverted_window = sqlx::query(
            "INSERT INTO promotions (shop_id, name, promo_type, discount_pct, start_date, end_date,
                                     created_at, updated_at)
             VALUES (1, 'Backwards', 'percentage', '10', '2026-02-01T00:00:00.000000Z',
                     '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z',
                     '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await;
        assert!(inverted_window.is_err(), "start date after end date must be rejected");
    }

    #[tokio::test]
    async fn rows_folded_by_sqlite_are_refolded_on_the_next_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        // What the SQL backfills leave behind: accented capitals stay as-is.
        sqlx::query(
            "INSERT INTO shops (id, name, name_search, owner_id, city, city_search, category,
                                category_search, created_at, updated_at)
             VALUES (7, 'Épicerie Fine', LOWER('Épicerie Fine'), 'owner-1', 'Écully',
                     LOWER('Écully'), 'Épicerie', LOWER('Épicerie'),
                     '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .expect("insert shop");
        sqlx::query(
            "INSERT INTO products (id, shop_id, name, description, search_text, sell_price,
                                   created_at, updated_at)
             VALUES (70, 7, 'Éclair', 'Choux', LOWER('Éclair') || char(10) || LOWER('Choux'),
                     '2.80', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .expect("insert product");

        let shops = SqlShopRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let by_city = ShopQuery { city: Some("Écully".to_string()), ..ShopQuery::default() };
        assert_eq!(ShopRepository::list(&shops, &by_city).await.expect("before").total_count, 0);

        run_pending(&pool).await.expect("re-run migrations");

        assert_eq!(ShopRepository::list(&shops, &by_city).await.expect("city").total_count, 1);
        let by_category =
            ShopQuery { category: Some("épicerie".to_string()), ..ShopQuery::default() };
        let page = ShopRepository::list(&shops, &by_category).await.expect("category");
        assert_eq!(page.total_count, 1);
        let by_name = ShopQuery { name: Some("épicerie".to_string()), ..ShopQuery::default() };
        assert_eq!(ShopRepository::list(&shops, &by_name).await.expect("name").total_count, 1);
        let eclair = ProductQuery { search: Some("éclair".to_string()), ..ProductQuery::default() };
        let page = ProductRepository::list(&products, &eclair).await.expect("product");
        assert_eq!(page.total_count, 1);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(table_count(&pool, "shops").await, 0);
        assert_eq!(table_count(&pool, "bills").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
