use sqlx::Row;

use bazaar_core::domain::bill::{
    Bill, BillId, BillItem, BillNumber, BillOwner, BillStatus, GuestContact, NewBill,
};
use bazaar_core::domain::product::ProductId;
use bazaar_core::domain::promotion::PromotionId;
use bazaar_core::domain::shop::ShopId;
use bazaar_core::domain::user::UserId;

use super::{decode_decimal, decode_err, decode_ts, encode_ts, BillRepository, RepositoryError};
use crate::DbPool;

const BILL_COLUMNS: &str = "id, number, shop_id, user_id, guest_id, guest_email, guest_first_name,
    guest_last_name, guest_phone, guest_street, guest_city, guest_zip_code, guest_country,
    status, billed_at";

pub struct SqlBillRepository {
    pool: DbPool,
}

impl SqlBillRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn items_for(&self, bill_id: i64) -> Result<Vec<BillItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, quantity, unit_price, final_price, promotion_id
             FROM bill_items WHERE bill_id = ? ORDER BY id ASC",
        )
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    async fn hydrate(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Bill>, RepositoryError> {
        let mut bills = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id").map_err(decode_err)?;
            let items = self.items_for(id).await?;
            bills.push(row_to_bill(row, items)?);
        }
        Ok(bills)
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<BillItem, RepositoryError> {
    let product_id: i64 = row.try_get("product_id").map_err(decode_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_err)?;
    let unit_price: String = row.try_get("unit_price").map_err(decode_err)?;
    let final_price: String = row.try_get("final_price").map_err(decode_err)?;
    let promotion_id: Option<i64> = row.try_get("promotion_id").map_err(decode_err)?;

    Ok(BillItem {
        product_id: ProductId(product_id),
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode("bill item quantity out of range".to_string()))?,
        unit_price: decode_decimal("unit_price", &unit_price)?,
        final_price: decode_decimal("final_price", &final_price)?,
        promotion_id: promotion_id.map(PromotionId),
    })
}

fn row_to_bill(
    row: &sqlx::sqlite::SqliteRow,
    items: Vec<BillItem>,
) -> Result<Bill, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let number: String = row.try_get("number").map_err(decode_err)?;
    let shop_id: i64 = row.try_get("shop_id").map_err(decode_err)?;
    let user_id: Option<String> = row.try_get("user_id").map_err(decode_err)?;
    let guest_id: Option<String> = row.try_get("guest_id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let billed_at: String = row.try_get("billed_at").map_err(decode_err)?;

    let owner = match (user_id, guest_id) {
        (Some(user_id), None) => BillOwner::User { user_id: UserId(user_id) },
        (None, Some(guest_id)) => {
            let text = |column: &str| -> Result<String, RepositoryError> {
                let value: Option<String> = row.try_get(column).map_err(decode_err)?;
                Ok(value.unwrap_or_default())
            };
            BillOwner::Guest {
                guest_id,
                contact: GuestContact {
                    email: text("guest_email")?,
                    first_name: text("guest_first_name")?,
                    last_name: text("guest_last_name")?,
                    phone: row.try_get("guest_phone").map_err(decode_err)?,
                    street: text("guest_street")?,
                    city: text("guest_city")?,
                    zip_code: text("guest_zip_code")?,
                    country: text("guest_country")?,
                },
            }
        }
        _ => {
            return Err(RepositoryError::Decode(format!(
                "bill {id} must belong to exactly one user or guest"
            )))
        }
    };

    Ok(Bill {
        id: BillId(id),
        number: BillNumber(number),
        owner,
        shop_id: ShopId(shop_id),
        status: BillStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown bill status `{status}`")))?,
        billed_at: decode_ts("billed_at", &billed_at)?,
        items,
    })
}

async fn insert_bill(
    conn: &mut sqlx::SqliteConnection,
    bill: &NewBill,
) -> Result<i64, RepositoryError> {
    if bill.items.is_empty() {
        return Err(RepositoryError::Constraint("a bill needs at least one item".to_string()));
    }
    let (user_id, guest_id, contact) = match &bill.owner {
        BillOwner::User { user_id } => (Some(user_id.as_str()), None, None),
        BillOwner::Guest { guest_id, contact } => (None, Some(guest_id.as_str()), Some(contact)),
    };

    let result = sqlx::query(
        "INSERT INTO bills (number, shop_id, user_id, guest_id, guest_email, guest_first_name,
                            guest_last_name, guest_phone, guest_street, guest_city,
                            guest_zip_code, guest_country, status, billed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(bill.number.as_str())
    .bind(bill.shop_id.0)
    .bind(user_id)
    .bind(guest_id)
    .bind(contact.map(|c| c.email.as_str()))
    .bind(contact.map(|c| c.first_name.as_str()))
    .bind(contact.map(|c| c.last_name.as_str()))
    .bind(contact.and_then(|c| c.phone.as_deref()))
    .bind(contact.map(|c| c.street.as_str()))
    .bind(contact.map(|c| c.city.as_str()))
    .bind(contact.map(|c| c.zip_code.as_str()))
    .bind(contact.map(|c| c.country.as_str()))
    .bind(bill.status.as_str())
    .bind(encode_ts(bill.billed_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| match error {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            RepositoryError::Constraint(format!("bill number {} already exists", bill.number))
        }
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            RepositoryError::Constraint(format!("shop {} does not exist", bill.shop_id))
        }
        other => RepositoryError::Database(other),
    })?;
    let id = result.last_insert_rowid();

    for item in &bill.items {
        sqlx::query(
            "INSERT INTO bill_items (bill_id, product_id, quantity, unit_price, final_price,
                                     promotion_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(item.product_id.0)
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.to_string())
        .bind(item.final_price.to_string())
        .bind(item.promotion_id.map(|promotion| promotion.0))
        .execute(&mut *conn)
        .await?;
    }

    Ok(id)
}

#[async_trait::async_trait]
impl BillRepository for SqlBillRepository {
    async fn create(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_bill(&mut tx, &bill).await?;
        tx.commit().await?;
        Ok(bill.with_id(BillId(id)))
    }

    async fn create_all(&self, bills: Vec<NewBill>) -> Result<Vec<Bill>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(bills.len());
        for bill in &bills {
            ids.push(insert_bill(&mut tx, bill).await?);
        }
        tx.commit().await?;
        Ok(bills.into_iter().zip(ids).map(|(bill, id)| bill.with_id(BillId(id))).collect())
    }

    async fn find_by_id(&self, id: BillId) -> Result<Option<Bill>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BILL_COLUMNS} FROM bills WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_by_shop(&self, shop_id: ShopId) -> Result<Vec<Bill>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BILL_COLUMNS} FROM bills WHERE shop_id = ? ORDER BY billed_at DESC, id DESC"
        ))
        .bind(shop_id.0)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_by_status(
        &self,
        shop_id: ShopId,
        status: BillStatus,
    ) -> Result<Vec<Bill>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BILL_COLUMNS} FROM bills WHERE shop_id = ? AND status = ?
             ORDER BY billed_at DESC, id DESC"
        ))
        .bind(shop_id.0)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}
