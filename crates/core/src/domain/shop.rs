use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(pub i64);

impl fmt::Display for ShopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopStatus {
    Open,
    Closed,
    ClosingSoon,
    NotDefined,
}

impl ShopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::ClosingSoon => "closing_soon",
            Self::NotDefined => "not_defined",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            "closing_soon" | "closingsoon" => Self::ClosingSoon,
            _ => Self::NotDefined,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopType {
    Online,
    Physical,
    Both,
}

impl ShopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Physical => "physical",
            Self::Both => "both",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "online" => Some(Self::Online),
            "physical" => Some(Self::Physical),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Shop-level policy choosing among simultaneously active promotions on one product.
///
/// Values that do not name a known policy decode to `Unrecognized`, which the
/// promo engine treats as "no promotion applies".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoStrategy {
    #[default]
    BestForClient,
    MostRecent,
    FirstStarted,
    Cumulative,
    #[serde(other)]
    Unrecognized,
}

impl PromoStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestForClient => "best_for_client",
            Self::MostRecent => "most_recent",
            Self::FirstStarted => "first_started",
            Self::Cumulative => "cumulative",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_for_client" | "bestforclient" => Self::BestForClient,
            "most_recent" | "mostrecent" => Self::MostRecent,
            "first_started" | "firststarted" => Self::FirstStarted,
            "cumulative" => Self::Cumulative,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopAddress {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Opening hours for one weekday, compared against UTC wall-clock time.
/// Both bounds are inclusive; hours spanning midnight are not representable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub day: Weekday,
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    #[serde(default)]
    pub is_closed: bool,
}

impl Schedule {
    pub fn open(day: Weekday, open_time: NaiveTime, close_time: NaiveTime) -> Self {
        Self { day, open_time, close_time, is_closed: false }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_closed || now.weekday() != self.day {
            return false;
        }
        let time = now.time();
        self.open_time <= time && time <= self.close_time
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub name: String,
    pub owner_id: UserId,
    pub status: ShopStatus,
    pub shop_type: ShopType,
    pub category: Option<String>,
    pub address: Option<ShopAddress>,
    pub promo_strategy: PromoStrategy,
    /// At most one entry per weekday; a day without an entry is closed.
    #[serde(default)]
    pub schedule: Vec<Schedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shop {
    /// Open status and a schedule entry covering `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ShopStatus::Open && self.schedule.iter().any(|day| day.is_open_at(now))
    }

    pub fn city(&self) -> Option<&str> {
        self.address.as_ref().map(|address| address.city.as_str())
    }
}
