//! Promotion creation and update rules.
//!
//! Mode is immutable from birth; counters and redemption values are never
//! editable; a capacity decrease below the consumed count is rejected.

use chrono::NaiveDate;
use promo_db::models::promo::{PromoMode, Target};
use serde::Deserialize;

use crate::error::PromoError;

pub const MAX_POOL_SIZE: usize = 5000;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePromo {
    pub description: String,
    pub mode: PromoMode,
    pub capacity: i32,
    pub common_value: Option<String>,
    pub pool: Option<Vec<String>>,
    pub active_from: Option<NaiveDate>,
    pub active_until: Option<NaiveDate>,
    #[serde(default)]
    pub target: Target,
    pub image_url: Option<String>,
}

/// Partial update. Absent fields stay unchanged. The immutable fields are
/// present only so an attempt to set them is rejected with a field name
/// instead of being silently dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromoPatch {
    pub description: Option<String>,
    pub capacity: Option<i32>,
    pub active_from: Option<NaiveDate>,
    pub active_until: Option<NaiveDate>,
    pub target: Option<Target>,
    pub image_url: Option<String>,

    pub mode: Option<PromoMode>,
    pub common_value: Option<String>,
    pub pool: Option<Vec<String>>,
    pub used_count: Option<i32>,
    pub like_count: Option<i32>,
    pub active: Option<bool>,
}

fn check_description(description: &str) -> Result<(), PromoError> {
    if description.chars().count() < 10 || description.chars().count() > 300 {
        return Err(PromoError::validation(
            "description",
            "must be between 10 and 300 characters",
        ));
    }
    Ok(())
}

fn check_image_url(image_url: Option<&str>) -> Result<(), PromoError> {
    if image_url.is_some_and(|url| url.len() > 350) {
        return Err(PromoError::validation(
            "image_url",
            "must be at most 350 characters",
        ));
    }
    Ok(())
}

fn check_target(target: &Target) -> Result<(), PromoError> {
    if let Some(country) = &target.country {
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(PromoError::validation(
                "target.country",
                "must be a two-letter lowercase country code",
            ));
        }
    }
    for (field, age) in [
        ("target.age_from", target.age_from),
        ("target.age_until", target.age_until),
    ] {
        if let Some(age) = age {
            if !(0..=100).contains(&age) {
                return Err(PromoError::validation(field, "must be between 0 and 100"));
            }
        }
    }
    if let (Some(from), Some(until)) = (target.age_from, target.age_until) {
        if from >= until {
            return Err(PromoError::validation(
                "target.age_from",
                "must be strictly below target.age_until",
            ));
        }
    }
    if let Some(categories) = &target.categories {
        if categories.len() > 20 {
            return Err(PromoError::validation(
                "target.categories",
                "at most 20 categories",
            ));
        }
        for category in categories {
            if category.chars().count() < 2 || category.chars().count() > 20 {
                return Err(PromoError::validation(
                    "target.categories",
                    "each category must be between 2 and 20 characters",
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_create(req: &CreatePromo) -> Result<(), PromoError> {
    check_description(&req.description)?;
    check_image_url(req.image_url.as_deref())?;
    check_target(&req.target)?;

    if req.capacity < 1 {
        return Err(PromoError::validation("capacity", "must be at least 1"));
    }

    match req.mode {
        PromoMode::Common => {
            if req.pool.is_some() {
                return Err(PromoError::validation(
                    "pool",
                    "COMMON promotions take a single shared value, not a pool",
                ));
            }
            let value = req
                .common_value
                .as_deref()
                .ok_or_else(|| PromoError::validation("common_value", "required in COMMON mode"))?;
            if value.chars().count() < 5 || value.chars().count() > 30 {
                return Err(PromoError::validation(
                    "common_value",
                    "must be between 5 and 30 characters",
                ));
            }
        }
        PromoMode::Unique => {
            if req.common_value.is_some() {
                return Err(PromoError::validation(
                    "common_value",
                    "UNIQUE promotions take a pool, not a shared value",
                ));
            }
            if req.capacity != 1 {
                return Err(PromoError::validation(
                    "capacity",
                    "must be exactly 1 in UNIQUE mode; the pool length caps redemptions",
                ));
            }
            let pool = req
                .pool
                .as_deref()
                .ok_or_else(|| PromoError::validation("pool", "required in UNIQUE mode"))?;
            if pool.is_empty() || pool.len() > MAX_POOL_SIZE {
                return Err(PromoError::validation(
                    "pool",
                    format!("must hold between 1 and {MAX_POOL_SIZE} values"),
                ));
            }
            if pool.iter().any(|v| v.is_empty() || v.chars().count() > 30) {
                return Err(PromoError::validation(
                    "pool",
                    "each value must be between 1 and 30 characters",
                ));
            }
        }
    }
    Ok(())
}

/// Reject any attempt to touch immutable fields, then check the mutable
/// ones for well-formedness. Invariants that depend on the live record
/// (capacity vs used_count) are checked by the store's atomic update.
pub fn validate_patch(patch: &PromoPatch) -> Result<(), PromoError> {
    for (field, attempted) in [
        ("mode", patch.mode.is_some()),
        ("common_value", patch.common_value.is_some()),
        ("pool", patch.pool.is_some()),
        ("used_count", patch.used_count.is_some()),
        ("like_count", patch.like_count.is_some()),
        ("active", patch.active.is_some()),
    ] {
        if attempted {
            return Err(PromoError::validation(field, "is not editable"));
        }
    }

    if let Some(description) = &patch.description {
        check_description(description)?;
    }
    check_image_url(patch.image_url.as_deref())?;
    if let Some(target) = &patch.target {
        check_target(target)?;
    }
    if patch.capacity.is_some_and(|c| c < 1) {
        return Err(PromoError::validation("capacity", "must be at least 1"));
    }
    Ok(())
}

/// Mode-dependent capacity rule. Mode is immutable from birth, so this is
/// safe against a snapshot; the floor against `used_count` is checked by
/// the store against the fresh row instead.
pub fn check_capacity_change(mode: PromoMode, capacity: i32) -> Result<(), PromoError> {
    if mode == PromoMode::Unique && capacity != 1 {
        return Err(PromoError::validation(
            "capacity",
            "must stay 1 for UNIQUE promotions",
        ));
    }
    Ok(())
}
