use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::promotion::PromotionId;
use crate::domain::shop::ShopId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(pub i64);

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillNumber(pub String);

impl BillNumber {
    /// `BILL-YYYYMMDD-XXXXXX`, the suffix being six uppercase hex chars.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("BILL-{}-{}", now.format("%Y%m%d"), raw[..6].to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Contact details a guest must supply at checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
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

impl GuestContact {
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("email", &self.email),
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("street", &self.street),
            ("city", &self.city),
            ("zip code", &self.zip_code),
            ("country", &self.country),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!("guest {label} is required")));
            }
        }
        if !self.email.contains('@') {
            return Err(DomainError::Validation("guest email is not valid".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillOwner {
    User { user_id: UserId },
    Guest { guest_id: String, contact: GuestContact },
}

impl BillOwner {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::User { user_id } => Some(user_id),
            Self::Guest { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub final_price: Decimal,
    pub promotion_id: Option<PromotionId>,
}

impl BillItem {
    pub fn discount(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity) - self.final_price
    }
}

/// Bill before persistence; the repository assigns its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBill {
    pub number: BillNumber,
    pub owner: BillOwner,
    pub shop_id: ShopId,
    pub status: BillStatus,
    pub billed_at: DateTime<Utc>,
    pub items: Vec<BillItem>,
}

impl NewBill {
    pub fn with_id(self, id: BillId) -> Bill {
        Bill {
            id,
            number: self.number,
            owner: self.owner,
            shop_id: self.shop_id,
            status: self.status,
            billed_at: self.billed_at,
            items: self.items,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub number: BillNumber,
    pub owner: BillOwner,
    pub shop_id: ShopId,
    pub status: BillStatus,
    pub billed_at: DateTime<Utc>,
    pub items: Vec<BillItem>,
}

impl Bill {
    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(|item| item.final_price).sum()
    }

    pub fn total_discount(&self) -> Decimal {
        self.items.iter().map(BillItem::discount).sum()
    }
}
