use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::promo::{NewPromotion, PromoMode, Promotion, RedemptionRecord, Target};

/// Result of the store's atomic consume-and-record step. All three are
/// expected outcomes; infrastructure failures travel through `Err`.
#[derive(Debug)]
pub enum ConsumeOutcome {
    Redeemed(RedemptionRecord),
    AlreadyRedeemed,
    CapacityExhausted,
}

/// Mutable-field patch applied atomically against the fresh row, under the
/// same exclusive access as capacity consumption. Checks that depend on the
/// live counters (capacity floor, exhaustion, the conjunctive activeness
/// recompute) run here, never against a caller snapshot.
#[derive(Debug, Clone)]
pub struct PromotionUpdate {
    pub id: i64,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub capacity: Option<i32>,
    pub active_from: Option<NaiveDate>,
    pub active_until: Option<NaiveDate>,
    pub target: Option<Target>,
    /// Forced value for the manual flag. `None` keeps the conjunctive
    /// recompute, which can turn the flag off but never on.
    pub set_manual_active: Option<bool>,
    /// Whether the patched window contains today, as decided by the
    /// activeness resolver. Windows are only ever mutated by their owning
    /// business, so this input is not subject to the redemption race.
    pub window_ok: bool,
}

/// Why an atomic update was refused against the fresh row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejection {
    /// The new capacity would drop below the units already consumed.
    CapacityBelowUsed { used_count: i32 },
    /// Explicit activation was requested while no capacity remains.
    Exhausted,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(Promotion),
    Rejected(UpdateRejection),
}

impl PromotionUpdate {
    /// Fold the update into a promotion read under exclusive access.
    /// Callers persist only on `Ok`; a rejection leaves their copy dirty
    /// and discarded.
    pub fn apply(self, promo: &mut Promotion) -> std::result::Result<(), UpdateRejection> {
        if let Some(capacity) = self.capacity {
            if promo.mode == PromoMode::Common && capacity < promo.used_count {
                return Err(UpdateRejection::CapacityBelowUsed {
                    used_count: promo.used_count,
                });
            }
            promo.capacity = capacity;
        }
        if let Some(description) = self.description {
            promo.description = description;
        }
        if let Some(image_url) = self.image_url {
            promo.image_url = Some(image_url);
        }
        if let Some(target) = self.target {
            promo.target = target;
        }
        if let Some(from) = self.active_from {
            promo.active_from = Some(from);
        }
        if let Some(until) = self.active_until {
            promo.active_until = Some(until);
        }

        match self.set_manual_active {
            Some(true) => {
                if !promo.capacity_available() {
                    return Err(UpdateRejection::Exhausted);
                }
                promo.manual_active = true;
            }
            Some(false) => promo.manual_active = false,
            None => {
                promo.manual_active =
                    promo.manual_active && self.window_ok && promo.capacity_available();
            }
        }
        Ok(())
    }
}

/// Durable promotion storage.
///
/// `consume_and_record` is the concurrency linchpin: it must check the
/// duplicate constraint, re-check capacity, decrement it and insert the
/// redemption record as one serializable step per promotion. Two racing
/// calls for the last unit must produce exactly one `Redeemed`.
/// `apply_update` shares that isolation unit, so a business mutation can
/// never land on a snapshot a redemption has since invalidated.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    async fn get(&self, public_id: Uuid) -> Result<Option<Promotion>>;

    async fn create(&self, promo: NewPromotion) -> Result<Promotion>;

    /// Atomically re-read the promotion, fold the update in and persist it.
    /// Mode, counters and redemption values are never written through this
    /// path.
    async fn apply_update(&self, update: PromotionUpdate) -> Result<UpdateOutcome>;

    async fn find_redemption(
        &self,
        promotion_id: i64,
        user_id: i64,
    ) -> Result<Option<RedemptionRecord>>;

    /// Atomically allocate one redemption unit to `user_id` and record it.
    /// Flips `manual_active` off in the same step when the last unit goes.
    async fn consume_and_record(&self, promotion_id: i64, user_id: i64) -> Result<ConsumeOutcome>;

    async fn redemptions_for_user(&self, user_id: i64) -> Result<Vec<RedemptionRecord>>;
}
