use chrono::{Datelike, NaiveTime, Weekday};
use sqlx::{QueryBuilder, Row, Sqlite};

use bazaar_core::domain::product::fold_for_search;
use bazaar_core::domain::shop::{
    PromoStrategy, Schedule, Shop, ShopAddress, ShopId, ShopStatus, ShopType,
};
use bazaar_core::domain::user::UserId;

use super::query::{contains_pattern, Page, ShopQuery};
use super::{decode_err, decode_ts, encode_ts, RepositoryError, ShopRepository};
use crate::DbPool;

const SHOP_COLUMNS: &str = "s.id, s.name, s.owner_id, s.status, s.shop_type, s.category, s.street,
    s.city, s.postal_code, s.country, s.promo_strategy, s.created_at, s.updated_at";

pub struct SqlShopRepository {
    pool: DbPool,
}

impl SqlShopRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Shop, RepositoryError> {
        let mut shop = row_to_shop(row)?;
        shop.schedule = schedule_for_shop(&self.pool, shop.id).await?;
        Ok(shop)
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Fixed width, so stored times and the probed instant compare lexically.
fn encode_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S%.6f").to_string()
}

fn decode_time(column: &str, raw: &str) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

async fn schedule_for_shop(pool: &DbPool, shop_id: ShopId) -> Result<Vec<Schedule>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT weekday, open_time, close_time, is_closed
         FROM shop_schedules WHERE shop_id = ? ORDER BY weekday ASC",
    )
    .bind(shop_id.0)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let weekday: i64 = row.try_get("weekday").map_err(decode_err)?;
            let open_time: String = row.try_get("open_time").map_err(decode_err)?;
            let close_time: String = row.try_get("close_time").map_err(decode_err)?;
            let is_closed: bool = row.try_get("is_closed").map_err(decode_err)?;
            let day = usize::try_from(weekday)
                .ok()
                .and_then(|index| WEEK.get(index).copied())
                .ok_or_else(|| RepositoryError::Decode(format!("weekday out of range: {weekday}")))?;
            Ok(Schedule {
                day,
                open_time: decode_time("open_time", &open_time)?,
                close_time: decode_time("close_time", &close_time)?,
                is_closed,
            })
        })
        .collect()
}

async fn write_schedule(
    conn: &mut sqlx::SqliteConnection,
    shop_id: ShopId,
    schedule: &[Schedule],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM shop_schedules WHERE shop_id = ?")
        .bind(shop_id.0)
        .execute(&mut *conn)
        .await?;
    for day in schedule {
        let result = sqlx::query(
            "INSERT INTO shop_schedules (shop_id, weekday, open_time, close_time, is_closed)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(shop_id.0)
        .bind(i64::from(day.day.num_days_from_monday()))
        .bind(encode_time(day.open_time))
        .bind(encode_time(day.close_time))
        .bind(day.is_closed)
        .execute(&mut *conn)
        .await;
        if let Err(sqlx::Error::Database(db)) = &result {
            if db.is_unique_violation() || db.is_check_violation() {
                return Err(RepositoryError::Constraint(format!(
                    "invalid schedule for {} on shop {shop_id}",
                    day.day
                )));
            }
        }
        result?;
    }
    Ok(())
}

fn row_to_shop(row: &sqlx::sqlite::SqliteRow) -> Result<Shop, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let owner_id: String = row.try_get("owner_id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let shop_type: String = row.try_get("shop_type").map_err(decode_err)?;
    let category: Option<String> = row.try_get("category").map_err(decode_err)?;
    let street: Option<String> = row.try_get("street").map_err(decode_err)?;
    let city: Option<String> = row.try_get("city").map_err(decode_err)?;
    let postal_code: Option<String> = row.try_get("postal_code").map_err(decode_err)?;
    let country: Option<String> = row.try_get("country").map_err(decode_err)?;
    let promo_strategy: String = row.try_get("promo_strategy").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let shop_type = ShopType::parse(&shop_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown shop type `{shop_type}`")))?;

    let address = city.map(|city| ShopAddress {
        street: street.unwrap_or_default(),
        city,
        postal_code: postal_code.unwrap_or_default(),
        country: country.unwrap_or_default(),
    });

    Ok(Shop {
        id: ShopId(id),
        name,
        owner_id: UserId(owner_id),
        status: ShopStatus::parse(&status),
        shop_type,
        category,
        address,
        promo_strategy: PromoStrategy::parse(&promo_strategy),
        schedule: Vec::new(),
        created_at: decode_ts("created_at", &created_at)?,
        updated_at: decode_ts("updated_at", &updated_at)?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ShopQuery) {
    builder.push(" WHERE 1=1");
    if let Some(name) = query.name.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        builder.push(" AND s.name_search LIKE ");
        builder.push_bind(contains_pattern(&fold_for_search(name)));
        builder.push(" ESCAPE '\\'");
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        builder.push(" AND s.city_search = ");
        builder.push_bind(fold_for_search(city));
    }
    if let Some(shop_type) = query.shop_type {
        builder.push(" AND s.shop_type = ");
        builder.push_bind(shop_type.as_str());
    }
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        builder.push(" AND s.category_search = ");
        builder.push_bind(fold_for_search(category));
    }
    if let Some(status) = query.status {
        builder.push(" AND s.status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(now) = query.open_at {
        let time = encode_time(now.time());
        builder.push(
            " AND EXISTS (SELECT 1 FROM shop_schedules sc
                          WHERE sc.shop_id = s.id AND sc.is_closed = 0 AND sc.weekday = ",
        );
        builder.push_bind(i64::from(now.weekday().num_days_from_monday()));
        builder.push(" AND sc.open_time <= ");
        builder.push_bind(time.clone());
        builder.push(" AND sc.close_time >= ");
        builder.push_bind(time);
        builder.push(")");
    }
}

#[async_trait::async_trait]
impl ShopRepository for SqlShopRepository {
    async fn find_by_id(&self, id: ShopId) -> Result<Option<Shop>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SHOP_COLUMNS} FROM shops s WHERE s.id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &ShopQuery) -> Result<Page<Shop>, RepositoryError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM shops s");
        push_filters(&mut count, query);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("count")?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {SHOP_COLUMNS} FROM shops s"));
        push_filters(&mut select, query);
        select.push(" ORDER BY s.name COLLATE NOCASE ASC, s.id ASC LIMIT ");
        select.push_bind(i64::from(query.page.limit()));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(query.page.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let mut shops = Vec::with_capacity(rows.len());
        for row in &rows {
            shops.push(self.hydrate(row).await?);
        }
        Ok(Page::new(shops, query.page, u64::try_from(total).unwrap_or_default()))
    }

    async fn save(&self, shop: Shop) -> Result<(), RepositoryError> {
        let address = shop.address.as_ref();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO shops (id, name, name_search, owner_id, status, shop_type, category,
                                category_search, street, city, city_search, postal_code,
                                country, promo_strategy, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 name_search = excluded.name_search,
                 owner_id = excluded.owner_id,
                 status = excluded.status,
                 shop_type = excluded.shop_type,
                 category = excluded.category,
                 category_search = excluded.category_search,
                 street = excluded.street,
                 city = excluded.city,
                 city_search = excluded.city_search,
                 postal_code = excluded.postal_code,
                 country = excluded.country,
                 promo_strategy = excluded.promo_strategy,
                 updated_at = excluded.updated_at",
        )
        .bind(shop.id.0)
        .bind(&shop.name)
        .bind(fold_for_search(&shop.name))
        .bind(shop.owner_id.as_str())
        .bind(shop.status.as_str())
        .bind(shop.shop_type.as_str())
        .bind(&shop.category)
        .bind(shop.category.as_deref().map(fold_for_search))
        .bind(address.map(|a| a.street.clone()))
        .bind(address.map(|a| a.city.clone()))
        .bind(address.map(|a| fold_for_search(&a.city)))
        .bind(address.map(|a| a.postal_code.clone()))
        .bind(address.map(|a| a.country.clone()))
        .bind(shop.promo_strategy.as_str())
        .bind(encode_ts(shop.created_at))
        .bind(encode_ts(shop.updated_at))
        .execute(&mut *tx)
        .await?;
        write_schedule(&mut tx, shop.id, &shop.schedule).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn delete(&self, id: ShopId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM shops WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
