use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromoMode {
    #[serde(rename = "COMMON")]
    Common,
    #[serde(rename = "UNIQUE")]
    Unique,
}

impl PromoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoMode::Common => "COMMON",
            PromoMode::Unique => "UNIQUE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMMON" => Some(PromoMode::Common),
            "UNIQUE" => Some(PromoMode::Unique),
            _ => None,
        }
    }
}

/// Audience filter attached to a promotion. Absent fields impose no
/// constraint. Category membership only affects discovery, never redemption.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_from: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_until: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: i64,
    pub public_id: Uuid,
    pub business_id: i64,
    pub description: String,
    pub image_url: Option<String>,
    pub mode: PromoMode,
    pub capacity: i32,
    pub used_count: i32,
    pub common_value: Option<String>,
    pub pool: Vec<String>,
    pub active_from: Option<NaiveDate>,
    pub active_until: Option<NaiveDate>,
    pub manual_active: bool,
    pub target: Target,
    pub like_count: i32,
    pub created_at: DateTime<Utc>,
}

impl Promotion {
    /// Whether at least one redemption unit remains. Must be re-evaluated
    /// against persisted state right before capacity is consumed.
    pub fn capacity_available(&self) -> bool {
        match self.mode {
            PromoMode::Common => self.used_count < self.capacity,
            PromoMode::Unique => !self.pool.is_empty(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        !self.capacity_available()
    }

    pub fn usage_pct(&self) -> f32 {
        match self.mode {
            PromoMode::Common => {
                if self.capacity == 0 {
                    return 0.0;
                }
                (self.used_count as f32 / self.capacity as f32) * 100.0
            }
            PromoMode::Unique => {
                if self.pool.is_empty() { 100.0 } else { 0.0 }
            }
        }
    }
}

/// Creation payload handed to the store once it has passed validation.
/// The store owns the row id; the caller owns the public id.
#[derive(Debug, Clone)]
pub struct NewPromotion {
    pub public_id: Uuid,
    pub business_id: i64,
    pub description: String,
    pub image_url: Option<String>,
    pub mode: PromoMode,
    pub capacity: i32,
    pub common_value: Option<String>,
    pub pool: Vec<String>,
    pub active_from: Option<NaiveDate>,
    pub active_until: Option<NaiveDate>,
    pub manual_active: bool,
    pub target: Target,
}

/// Proof that a user redeemed a promotion. Insert-only; its existence is
/// the sole source of truth for "already redeemed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub id: i64,
    pub promotion_id: i64,
    pub user_id: i64,
    pub value: String,
    pub redeemed_at: DateTime<Utc>,
}
