//! The single place that derives "is this promotion redeemable right now".
//!
//! Every read or redemption path goes through [`effective_active`] instead
//! of re-deriving the flag combination locally.

use chrono::{DateTime, NaiveDate, Utc};
use promo_db::models::promo::Promotion;

/// Inclusive day-granularity window check in UTC. Absent bounds impose no
/// constraint; time-of-day never matters.
pub fn window_contains(today: NaiveDate, from: Option<NaiveDate>, until: Option<NaiveDate>) -> bool {
    match (from, until) {
        (None, None) => true,
        (Some(from), None) => today >= from,
        (None, Some(until)) => today <= until,
        (Some(from), Some(until)) => today >= from && today <= until,
    }
}

/// Manual flag AND window AND remaining capacity.
pub fn effective_active(promo: &Promotion, now: DateTime<Utc>) -> bool {
    promo.manual_active
        && window_contains(now.date_naive(), promo.active_from, promo.active_until)
        && promo.capacity_available()
}

#[cfg(test)]
mod tests {
    use super::*;
    use promo_db::models::promo::{PromoMode, Target};
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let from = Some(date("2024-01-10"));
        let until = Some(date("2024-01-20"));

        assert!(window_contains(date("2024-01-10"), from, until));
        assert!(window_contains(date("2024-01-20"), from, until));
        assert!(window_contains(date("2024-01-15"), from, until));
        assert!(!window_contains(date("2024-01-09"), from, until));
        assert!(!window_contains(date("2024-01-21"), from, until));
    }

    #[test]
    fn open_bounds_impose_no_constraint() {
        assert!(window_contains(date("1999-01-01"), None, None));
        assert!(window_contains(date("2024-01-10"), Some(date("2024-01-10")), None));
        assert!(!window_contains(date("2024-01-09"), Some(date("2024-01-10")), None));
        assert!(window_contains(date("2024-01-20"), None, Some(date("2024-01-20"))));
        assert!(!window_contains(date("2024-01-21"), None, Some(date("2024-01-20"))));
    }

    fn common_promo(manual_active: bool, used: i32, capacity: i32) -> Promotion {
        Promotion {
            id: 1,
            public_id: Uuid::new_v4(),
            business_id: 1,
            description: "A perfectly ordinary promotion".to_string(),
            image_url: None,
            mode: PromoMode::Common,
            capacity,
            used_count: used,
            common_value: Some("SAVE10".to_string()),
            pool: Vec::new(),
            active_from: None,
            active_until: None,
            manual_active,
            target: Target::default(),
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn effective_active_is_a_conjunction() {
        assert!(effective_active(&common_promo(true, 0, 5), Utc::now()));
        assert!(!effective_active(&common_promo(false, 0, 5), Utc::now()));
        assert!(!effective_active(&common_promo(true, 5, 5), Utc::now()));

        let mut windowed = common_promo(true, 0, 5);
        windowed.active_until = Some(date("2000-01-01"));
        assert!(!effective_active(&windowed, Utc::now()));
    }
}
