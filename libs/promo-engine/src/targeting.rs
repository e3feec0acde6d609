//! Audience targeting.
//!
//! Country and age restrict who may redeem. Categories only affect feed
//! filtering; a category mismatch never blocks a redemption.

use promo_db::models::promo::Target;
use serde::{Deserialize, Serialize};

/// Requester attributes as supplied by the authentication collaborator.
/// Unknown attributes fail closed against a filter that constrains them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub country: Option<String>,
    pub age: Option<i32>,
    #[serde(default)]
    pub interests: Vec<String>,
}

pub fn eligible_for_redemption(profile: &RequesterProfile, target: &Target) -> bool {
    if let Some(country) = &target.country {
        match &profile.country {
            Some(own) if own.eq_ignore_ascii_case(country) => {}
            _ => return false,
        }
    }
    if let Some(age_from) = target.age_from {
        match profile.age {
            Some(age) if age >= age_from => {}
            _ => return false,
        }
    }
    if let Some(age_until) = target.age_until {
        match profile.age {
            Some(age) if age <= age_until => {}
            _ => return false,
        }
    }
    true
}

/// Discovery-time filter: does the promotion advertise `category`?
/// Promotions without a category set match no category query.
///
/// This is a pure post-filter; callers paginating a feed must filter the
/// full result first and paginate afterwards, or counts will drift.
pub fn matches_category(target: &Target, category: &str) -> bool {
    target
        .categories
        .as_deref()
        .is_some_and(|cats| cats.iter().any(|c| c.eq_ignore_ascii_case(category)))
}
