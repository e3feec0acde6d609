use std::sync::Arc;

use chrono::Utc;
use promo_db::models::promo::{NewPromotion, Promotion};
use promo_db::store::{PromotionStore, PromotionUpdate, UpdateOutcome, UpdateRejection};
use tracing::info;
use uuid::Uuid;

use crate::activeness;
use crate::error::PromoError;
use crate::mutation::{self, CreatePromo, PromoPatch};

/// Business-facing promotion lifecycle: creation, mutation and the explicit
/// manual activation toggle. Redemption lives in [`crate::RedemptionService`].
pub struct PromoService {
    store: Arc<dyn PromotionStore>,
}

impl PromoService {
    pub fn new(store: Arc<dyn PromotionStore>) -> Self {
        Self { store }
    }

    pub async fn create_promo(
        &self,
        business_id: i64,
        req: CreatePromo,
    ) -> Result<Promotion, PromoError> {
        mutation::validate_create(&req)?;

        // The stored flag starts from the window alone; capacity is full by
        // construction and the manual toggle defaults to on.
        let manual_active =
            activeness::window_contains(Utc::now().date_naive(), req.active_from, req.active_until);

        let promo = self
            .store
            .create(NewPromotion {
                public_id: Uuid::new_v4(),
                business_id,
                description: req.description,
                image_url: req.image_url,
                mode: req.mode,
                capacity: req.capacity,
                common_value: req.common_value,
                pool: req.pool.unwrap_or_default(),
                active_from: req.active_from,
                active_until: req.active_until,
                manual_active,
                target: req.target,
            })
            .await?;

        info!(
            promo = %promo.public_id,
            mode = promo.mode.as_str(),
            "Created promotion"
        );
        Ok(promo)
    }

    /// Fetch a promotion the business owns. Foreign promotions are reported
    /// as absent rather than forbidden.
    pub async fn get_owned(
        &self,
        business_id: i64,
        public_id: Uuid,
    ) -> Result<Promotion, PromoError> {
        let promo = self.store.get(public_id).await?;
        match promo {
            Some(promo) if promo.business_id == business_id => Ok(promo),
            _ => Err(PromoError::NotFound),
        }
    }

    pub async fn update_promo(
        &self,
        business_id: i64,
        public_id: Uuid,
        patch: PromoPatch,
    ) -> Result<Promotion, PromoError> {
        mutation::validate_patch(&patch)?;

        // The snapshot only settles ownership, the immutable mode and the
        // patched window. Everything that a racing redemption can move
        // (counters, pool, the manual flag) is re-read and re-checked by
        // the store inside its atomic step.
        let promo = self.get_owned(business_id, public_id).await?;
        if let Some(capacity) = patch.capacity {
            mutation::check_capacity_change(promo.mode, capacity)?;
        }
        let window_ok = activeness::window_contains(
            Utc::now().date_naive(),
            patch.active_from.or(promo.active_from),
            patch.active_until.or(promo.active_until),
        );

        // Conjunctive recompute inside the store: an update may force the
        // flag off (window moved, capacity met) but never flips an
        // inactive promotion back on. Reactivation is its own action.
        let outcome = self
            .store
            .apply_update(PromotionUpdate {
                id: promo.id,
                description: patch.description,
                image_url: patch.image_url,
                capacity: patch.capacity,
                active_from: patch.active_from,
                active_until: patch.active_until,
                target: patch.target,
                set_manual_active: None,
                window_ok,
            })
            .await?;

        Self::map_update_outcome(outcome)
    }

    fn map_update_outcome(outcome: UpdateOutcome) -> Result<Promotion, PromoError> {
        match outcome {
            UpdateOutcome::Updated(promo) => Ok(promo),
            UpdateOutcome::Rejected(UpdateRejection::CapacityBelowUsed { used_count }) => {
                Err(PromoError::validation(
                    "capacity",
                    format!("cannot drop below the {used_count} already used"),
                ))
            }
            UpdateOutcome::Rejected(UpdateRejection::Exhausted) => Err(PromoError::validation(
                "active",
                "cannot activate an exhausted promotion",
            )),
        }
    }

    /// Explicit manual toggle. Turning a promotion on is only accepted while
    /// its window and capacity would make it effectively redeemable;
    /// turning it off is always accepted.
    pub async fn set_manual_active(
        &self,
        business_id: i64,
        public_id: Uuid,
        active: bool,
    ) -> Result<Promotion, PromoError> {
        let promo = self.get_owned(business_id, public_id).await?;

        let window_ok = activeness::window_contains(
            Utc::now().date_naive(),
            promo.active_from,
            promo.active_until,
        );
        if active && !window_ok {
            return Err(PromoError::validation(
                "active",
                "cannot activate outside the configured window",
            ));
        }

        // The exhaustion check runs in the store against the fresh row;
        // a snapshot check here could race the last redemption.
        let outcome = self
            .store
            .apply_update(PromotionUpdate {
                id: promo.id,
                description: None,
                image_url: None,
                capacity: None,
                active_from: None,
                active_until: None,
                target: None,
                set_manual_active: Some(active),
                window_ok,
            })
            .await?;

        Self::map_update_outcome(outcome)
    }
}
