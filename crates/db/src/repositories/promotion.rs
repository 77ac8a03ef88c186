use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::promotion::{
    PromoType, Promotion, PromotionDraft, PromotionId, PromotionPatch, PromotionRule,
};
use bazaar_core::domain::shop::ShopId;

use super::{
    decode_decimal, decode_err, decode_ts, encode_ts, PromotionRepository, RepositoryError,
};
use crate::DbPool;

const PROMOTION_COLUMNS: &str = "pr.id, pr.shop_id, pr.name, pr.description, pr.promo_type,
    pr.discount_pct, pr.buy_quantity, pr.get_quantity, pr.start_date, pr.end_date, pr.is_active,
    pr.created_at, pr.updated_at";

pub struct SqlPromotionRepository {
    pool: DbPool,
}

impl SqlPromotionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_promotion(
    row: &sqlx::sqlite::SqliteRow,
    product_ids: Vec<ProductId>,
) -> Result<Promotion, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let shop_id: i64 = row.try_get("shop_id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let description: Option<String> = row.try_get("description").map_err(decode_err)?;
    let promo_type: String = row.try_get("promo_type").map_err(decode_err)?;
    let discount_pct: Option<String> = row.try_get("discount_pct").map_err(decode_err)?;
    let buy_quantity: Option<i64> = row.try_get("buy_quantity").map_err(decode_err)?;
    let get_quantity: Option<i64> = row.try_get("get_quantity").map_err(decode_err)?;
    let start_date: String = row.try_get("start_date").map_err(decode_err)?;
    let end_date: String = row.try_get("end_date").map_err(decode_err)?;
    let is_active: bool = row.try_get("is_active").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let rule = match PromoType::parse(&promo_type) {
        Some(PromoType::Percentage) => {
            let raw = discount_pct.ok_or_else(|| {
                RepositoryError::Decode(format!("promotion {id} has no discount_pct"))
            })?;
            PromotionRule::Percentage { discount_pct: decode_decimal("discount_pct", &raw)? }
        }
        Some(PromoType::ForXGetY) => match (buy_quantity, get_quantity) {
            (Some(buy), Some(get)) => PromotionRule::ForXGetY {
                buy_quantity: quantity_from_db("buy_quantity", buy)?,
                get_quantity: quantity_from_db("get_quantity", get)?,
            },
            _ => {
                return Err(RepositoryError::Decode(format!(
                    "promotion {id} is missing buy/get quantities"
                )))
            }
        },
        None => {
            return Err(RepositoryError::Decode(format!("unknown promo type `{promo_type}`")))
        }
    };

    Ok(Promotion {
        id: PromotionId(id),
        shop_id: ShopId(shop_id),
        name,
        description,
        rule,
        start_date: decode_ts("start_date", &start_date)?,
        end_date: decode_ts("end_date", &end_date)?,
        is_active,
        product_ids,
        created_at: decode_ts("created_at", &created_at)?,
        updated_at: decode_ts("updated_at", &updated_at)?,
    })
}

fn quantity_from_db(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("{column} out of range")))
}

fn rule_columns(rule: &PromotionRule) -> (&'static str, Option<String>, Option<i64>, Option<i64>) {
    (
        rule.promo_type().as_str(),
        rule.discount_pct().map(|pct: Decimal| pct.to_string()),
        rule.buy_quantity().map(i64::from),
        rule.get_quantity().map(i64::from),
    )
}

async fn product_ids_for(
    pool: &DbPool,
    promotion_id: i64,
) -> Result<Vec<ProductId>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT product_id FROM promotion_products WHERE promotion_id = ? ORDER BY product_id",
    )
    .bind(promotion_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<i64, _>("product_id").map(ProductId).map_err(decode_err))
        .collect()
}

async fn hydrate(
    pool: &DbPool,
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<Promotion>, RepositoryError> {
    let mut promotions = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.try_get("id").map_err(decode_err)?;
        let product_ids = product_ids_for(pool, id).await?;
        promotions.push(row_to_promotion(row, product_ids)?);
    }
    Ok(promotions)
}

/// Every promotion linked to `product_id`, in id order.
pub(crate) async fn promotions_for_product(
    pool: &DbPool,
    product_id: ProductId,
) -> Result<Vec<Promotion>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {PROMOTION_COLUMNS}
         FROM promotions pr
         JOIN promotion_products pp ON pp.promotion_id = pr.id
         WHERE pp.product_id = ?
         ORDER BY pr.id ASC"
    ))
    .bind(product_id.0)
    .fetch_all(pool)
    .await?;

    hydrate(pool, &rows).await
}

async fn write_links(
    conn: &mut sqlx::SqliteConnection,
    promotion_id: i64,
    product_ids: &[ProductId],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM promotion_products WHERE promotion_id = ?")
        .bind(promotion_id)
        .execute(&mut *conn)
        .await?;
    for product_id in product_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO promotion_products (promotion_id, product_id) VALUES (?, ?)",
        )
        .bind(promotion_id)
        .bind(product_id.0)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl PromotionRepository for SqlPromotionRepository {
    async fn find_by_id(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {PROMOTION_COLUMNS} FROM promotions pr WHERE pr.id = ?"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref row) => Ok(hydrate(&self.pool, std::slice::from_ref(row)).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Promotion>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions pr WHERE pr.shop_id = ? ORDER BY pr.id ASC"
        ))
        .bind(shop_id.0)
        .fetch_all(&self.pool)
        .await?;

        hydrate(&self.pool, &rows).await
    }

    async fn create(
        &self,
        shop_id: ShopId,
        draft: PromotionDraft,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        draft.validate().map_err(|error| RepositoryError::Constraint(error.to_string()))?;
        let (promo_type, discount_pct, buy, get) = rule_columns(&draft.rule);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO promotions (shop_id, name, description, promo_type, discount_pct,
                                     buy_quantity, get_quantity, start_date, end_date, is_active,
                                     created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(shop_id.0)
        .bind(draft.name.trim())
        .bind(&draft.description)
        .bind(promo_type)
        .bind(discount_pct)
        .bind(buy)
        .bind(get)
        .bind(encode_ts(draft.start_date))
        .bind(encode_ts(draft.end_date))
        .bind(draft.is_active)
        .bind(encode_ts(now))
        .bind(encode_ts(now))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        write_links(&mut tx, id, &draft.product_ids).await?;
        tx.commit().await?;

        draft
            .into_promotion(PromotionId(id), shop_id, now)
            .map_err(|error| RepositoryError::Constraint(error.to_string()))
    }

    async fn update(
        &self,
        id: PromotionId,
        patch: PromotionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Promotion>, RepositoryError> {
        let Some(current) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        let updated = patch
            .apply_to(&current, now)
            .map_err(|error| RepositoryError::Constraint(error.to_string()))?;
        let (promo_type, discount_pct, buy, get) = rule_columns(&updated.rule);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE promotions SET name = ?, description = ?, promo_type = ?, discount_pct = ?,
                    buy_quantity = ?, get_quantity = ?, start_date = ?, end_date = ?,
                    is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(promo_type)
        .bind(discount_pct)
        .bind(buy)
        .bind(get)
        .bind(encode_ts(updated.start_date))
        .bind(encode_ts(updated.end_date))
        .bind(updated.is_active)
        .bind(encode_ts(updated.updated_at))
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        write_links(&mut tx, id.0, &updated.product_ids).await?;
        tx.commit().await?;

        Ok(Some(updated))
    }

    async fn delete(&self, id: PromotionId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM promotions WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
