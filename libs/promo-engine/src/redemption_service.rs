use std::sync::Arc;

use chrono::Utc;
use promo_db::store::{ConsumeOutcome, PromotionStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::activeness;
use crate::error::PromoError;
use crate::fraud::{FraudCheck, FraudVerdict};
use crate::targeting::{self, RequesterProfile};

/// Serializes redemption attempts into the store's atomic allocation step.
///
/// The pre-checks here (duplicate, eligibility, activeness) only
/// short-circuit; the store re-checks duplicates and capacity under
/// exclusive access, so two racing attempts can never both take the last
/// unit or both create a record for the same user.
pub struct RedemptionService {
    store: Arc<dyn PromotionStore>,
    fraud: Arc<dyn FraudCheck>,
}

impl RedemptionService {
    pub fn new(store: Arc<dyn PromotionStore>, fraud: Arc<dyn FraudCheck>) -> Self {
        Self { store, fraud }
    }

    /// Run one redemption attempt to a terminal outcome. On success the
    /// assigned value is returned; the matching record was created in the
    /// same atomic step that consumed the capacity.
    pub async fn redeem(
        &self,
        user_id: i64,
        profile: &RequesterProfile,
        public_id: Uuid,
    ) -> Result<String, PromoError> {
        let promo = self
            .store
            .get(public_id)
            .await?
            .ok_or(PromoError::NotFound)?;

        if self
            .store
            .find_redemption(promo.id, user_id)
            .await?
            .is_some()
        {
            return Err(PromoError::AlreadyRedeemed);
        }

        if !targeting::eligible_for_redemption(profile, &promo.target) {
            return Err(PromoError::NotEligible);
        }
        // Exhaustion is reported as its own reason; any other inactivity
        // (manual flag, window) collapses into NotEligible.
        if !promo.capacity_available() {
            return Err(PromoError::CapacityExhausted);
        }
        if !activeness::effective_active(&promo, Utc::now()) {
            return Err(PromoError::NotEligible);
        }

        let mut verdict = self.fraud.validate(user_id, public_id).await;
        if verdict == FraudVerdict::Unavailable {
            warn!(
                promo = %public_id,
                checker = self.fraud.name(),
                "Fraud check unavailable, retrying once"
            );
            verdict = self.fraud.validate(user_id, public_id).await;
        }
        if verdict != FraudVerdict::Approved {
            return Err(PromoError::FraudCheckRejected);
        }

        match self.store.consume_and_record(promo.id, user_id).await? {
            ConsumeOutcome::Redeemed(record) => {
                info!(promo = %public_id, "Redeemed promotion");
                Ok(record.value)
            }
            ConsumeOutcome::AlreadyRedeemed => Err(PromoError::AlreadyRedeemed),
            // Benign race: another attempt took the last unit between the
            // pre-check and the allocation.
            ConsumeOutcome::CapacityExhausted => Err(PromoError::CapacityExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{CreatePromo, PromoPatch};
    use crate::promo_service::PromoService;
    use async_trait::async_trait;
    use futures::future::join_all;
    use promo_db::memory::MemoryStore;
    use promo_db::models::promo::{PromoMode, Promotion, Target};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFraud {
        verdict: FraudVerdict,
        calls: AtomicUsize,
    }

    impl StaticFraud {
        fn new(verdict: FraudVerdict) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FraudCheck for StaticFraud {
        async fn validate(&self, _user_id: i64, _promotion_id: Uuid) -> FraudVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    /// Unavailable on the first call, approves afterwards.
    struct FlakyFraud {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FraudCheck for FlakyFraud {
        async fn validate(&self, _user_id: i64, _promotion_id: Uuid) -> FraudVerdict {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                FraudVerdict::Unavailable
            } else {
                FraudVerdict::Approved
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        promos: PromoService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            promos: PromoService::new(store.clone()),
            store,
        }
    }

    fn redeemer(fx: &Fixture, fraud: Arc<dyn FraudCheck>) -> Arc<RedemptionService> {
        Arc::new(RedemptionService::new(fx.store.clone(), fraud))
    }

    async fn create_common(fx: &Fixture, capacity: i32) -> Promotion {
        fx.promos
            .create_promo(
                1,
                CreatePromo {
                    description: "Ten percent off everything".to_string(),
                    mode: PromoMode::Common,
                    capacity,
                    common_value: Some("SAVE10".to_string()),
                    pool: None,
                    active_from: None,
                    active_until: None,
                    target: Target::default(),
                    image_url: None,
                },
            )
            .await
            .unwrap()
    }

    async fn create_unique(fx: &Fixture, pool: &[&str], target: Target) -> Promotion {
        fx.promos
            .create_promo(
                1,
                CreatePromo {
                    description: "One voucher per customer".to_string(),
                    mode: PromoMode::Unique,
                    capacity: 1,
                    common_value: None,
                    pool: Some(pool.iter().map(|s| s.to_string()).collect()),
                    active_from: None,
                    active_until: None,
                    target,
                    image_url: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_promotion_is_not_found() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));

        let err = svc
            .redeem(1, &RequesterProfile::default(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PromoError::NotFound));
    }

    #[tokio::test]
    async fn common_capacity_is_never_oversubscribed() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let promo = create_common(&fx, 3).await;

        let attempts = join_all((0..10).map(|user_id| {
            let svc = svc.clone();
            let public_id = promo.public_id;
            tokio::spawn(async move {
                svc.redeem(user_id, &RequesterProfile::default(), public_id)
                    .await
            })
        }))
        .await;

        let mut ok = 0;
        let mut exhausted = 0;
        for attempt in attempts {
            match attempt.unwrap() {
                Ok(value) => {
                    assert_eq!(value, "SAVE10");
                    ok += 1;
                }
                Err(PromoError::CapacityExhausted) => exhausted += 1,
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(exhausted, 7);

        let stored = fx.store.get(promo.public_id).await.unwrap().unwrap();
        assert_eq!(stored.used_count, 3);
        assert!(!stored.manual_active);
    }

    #[tokio::test]
    async fn unique_pool_yields_distinct_values_exactly_once() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let promo = create_unique(&fx, &["AAA", "BBB", "CCC"], Target::default()).await;

        let attempts = join_all((0..6).map(|user_id| {
            let svc = svc.clone();
            let public_id = promo.public_id;
            tokio::spawn(async move {
                svc.redeem(user_id, &RequesterProfile::default(), public_id)
                    .await
            })
        }))
        .await;

        let mut values = Vec::new();
        let mut exhausted = 0;
        for attempt in attempts {
            match attempt.unwrap() {
                Ok(value) => values.push(value),
                Err(PromoError::CapacityExhausted) => exhausted += 1,
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
        values.sort();
        assert_eq!(values, vec!["AAA", "BBB", "CCC"]);
        assert_eq!(exhausted, 3);
    }

    #[tokio::test]
    async fn concurrent_first_redemptions_by_one_user_yield_one_success() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let promo = create_common(&fx, 10).await;

        let attempts = join_all((0..2).map(|_| {
            let svc = svc.clone();
            let public_id = promo.public_id;
            tokio::spawn(
                async move { svc.redeem(7, &RequesterProfile::default(), public_id).await },
            )
        }))
        .await;

        let outcomes: Vec<_> = attempts.into_iter().map(|a| a.unwrap()).collect();
        let ok = outcomes.iter().filter(|o| o.is_ok()).count();
        let dup = outcomes
            .iter()
            .filter(|o| matches!(o, Err(PromoError::AlreadyRedeemed)))
            .count();
        assert_eq!((ok, dup), (1, 1));

        let stored = fx.store.get(promo.public_id).await.unwrap().unwrap();
        assert_eq!(stored.used_count, 1);
    }

    #[tokio::test]
    async fn repeat_redemption_is_rejected() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let promo = create_common(&fx, 10).await;

        svc.redeem(7, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap();
        let err = svc
            .redeem(7, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoError::AlreadyRedeemed));
    }

    #[tokio::test]
    async fn rejected_fraud_check_leaves_no_state_behind() {
        let fx = fixture();
        let fraud = StaticFraud::new(FraudVerdict::Rejected);
        let svc = redeemer(&fx, fraud.clone());
        let promo = create_common(&fx, 10).await;

        let err = svc
            .redeem(7, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoError::FraudCheckRejected));
        // A rejection verdict is never retried.
        assert_eq!(fraud.calls.load(Ordering::SeqCst), 1);

        let stored = fx.store.get(promo.public_id).await.unwrap().unwrap();
        assert_eq!(stored.used_count, 0);
        assert!(fx.store.find_redemption(stored.id, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_fraud_check_is_retried_exactly_once() {
        let fx = fixture();
        let promo = create_common(&fx, 10).await;

        let flaky = Arc::new(FlakyFraud {
            calls: AtomicUsize::new(0),
        });
        let svc = redeemer(&fx, flaky.clone());
        svc.redeem(7, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        let down = StaticFraud::new(FraudVerdict::Unavailable);
        let svc = redeemer(&fx, down.clone());
        let err = svc
            .redeem(8, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoError::FraudCheckRejected));
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn country_targeted_unique_promotion_scenario() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let target = Target {
            country: Some("us".to_string()),
            ..Target::default()
        };
        let promo = create_unique(&fx, &["A", "B"], target).await;

        let de = RequesterProfile {
            country: Some("de".to_string()),
            ..RequesterProfile::default()
        };
        let us = RequesterProfile {
            country: Some("us".to_string()),
            ..RequesterProfile::default()
        };

        let err = svc.redeem(1, &de, promo.public_id).await.unwrap_err();
        assert!(matches!(err, PromoError::NotEligible));

        let first = svc.redeem(2, &us, promo.public_id).await.unwrap();
        let second = svc.redeem(3, &us, promo.public_id).await.unwrap();
        let mut values = vec![first, second];
        values.sort();
        assert_eq!(values, vec!["A", "B"]);

        let err = svc.redeem(4, &us, promo.public_id).await.unwrap_err();
        assert!(matches!(err, PromoError::CapacityExhausted));
    }

    #[tokio::test]
    async fn exhaustion_is_terminal_until_manually_reactivated() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let promo = create_common(&fx, 1).await;

        svc.redeem(1, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap();
        let stored = fx.store.get(promo.public_id).await.unwrap().unwrap();
        assert!(!stored.manual_active);

        // Raising capacity restores headroom but not the manual flag.
        let raised = fx
            .promos
            .update_promo(
                1,
                promo.public_id,
                PromoPatch {
                    capacity: Some(2),
                    ..PromoPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(!raised.manual_active);

        let err = svc
            .redeem(2, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoError::NotEligible));

        fx.promos
            .set_manual_active(1, promo.public_id, true)
            .await
            .unwrap();
        let value = svc
            .redeem(2, &RequesterProfile::default(), promo.public_id)
            .await
            .unwrap();
        assert_eq!(value, "SAVE10");
    }

    #[tokio::test]
    async fn redemption_history_records_assigned_values() {
        let fx = fixture();
        let svc = redeemer(&fx, StaticFraud::new(FraudVerdict::Approved));
        let common = create_common(&fx, 5).await;
        let unique = create_unique(&fx, &["AAA"], Target::default()).await;

        svc.redeem(7, &RequesterProfile::default(), common.public_id)
            .await
            .unwrap();
        svc.redeem(7, &RequesterProfile::default(), unique.public_id)
            .await
            .unwrap();

        let history = fx.store.redemptions_for_user(7).await.unwrap();
        let mut values: Vec<_> = history.iter().map(|r| r.value.as_str()).collect();
        values.sort();
        assert_eq!(values, vec!["AAA", "SAVE10"]);
    }
}
