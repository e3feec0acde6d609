use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::promo::{NewPromotion, PromoMode, Promotion, RedemptionRecord};
use crate::store::{ConsumeOutcome, PromotionStore, PromotionUpdate, UpdateOutcome};

struct Slot {
    promo: Promotion,
    redemptions: HashMap<i64, RedemptionRecord>,
}

/// In-process promotion store for tests and embedded deployments.
///
/// Each promotion lives behind its own mutex together with its redemption
/// records, so `consume_and_record` runs as one critical section per
/// promotion and unrelated promotions never contend.
pub struct MemoryStore {
    slots: RwLock<HashMap<i64, Arc<Mutex<Slot>>>>,
    by_public: RwLock<HashMap<Uuid, i64>>,
    next_promo_id: AtomicI64,
    next_record_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            by_public: RwLock::new(HashMap::new()),
            next_promo_id: AtomicI64::new(1),
            next_record_id: AtomicI64::new(1),
        }
    }

    async fn slot(&self, promotion_id: i64) -> Result<Arc<Mutex<Slot>>> {
        self.slots
            .read()
            .await
            .get(&promotion_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Promotion {promotion_id} does not exist"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromotionStore for MemoryStore {
    async fn get(&self, public_id: Uuid) -> Result<Option<Promotion>> {
        let id = match self.by_public.read().await.get(&public_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let slot = self.slot(id).await?;
        let guard = slot.lock().await;
        Ok(Some(guard.promo.clone()))
    }

    async fn create(&self, promo: NewPromotion) -> Result<Promotion> {
        let id = self.next_promo_id.fetch_add(1, Ordering::Relaxed);
        let stored = Promotion {
            id,
            public_id: promo.public_id,
            business_id: promo.business_id,
            description: promo.description,
            image_url: promo.image_url,
            mode: promo.mode,
            capacity: promo.capacity,
            used_count: 0,
            common_value: promo.common_value,
            pool: promo.pool,
            active_from: promo.active_from,
            active_until: promo.active_until,
            manual_active: promo.manual_active,
            target: promo.target,
            like_count: 0,
            created_at: Utc::now(),
        };

        self.by_public
            .write()
            .await
            .insert(stored.public_id, stored.id);
        self.slots.write().await.insert(
            id,
            Arc::new(Mutex::new(Slot {
                promo: stored.clone(),
                redemptions: HashMap::new(),
            })),
        );
        Ok(stored)
    }

    async fn apply_update(&self, update: PromotionUpdate) -> Result<UpdateOutcome> {
        let slot = self.slot(update.id).await?;
        let mut guard = slot.lock().await;

        // Folded into a copy under the slot lock, so the counters the
        // update validates against are the ones a racing redemption sees.
        let mut updated = guard.promo.clone();
        match update.apply(&mut updated) {
            Ok(()) => {
                guard.promo = updated.clone();
                Ok(UpdateOutcome::Updated(updated))
            }
            Err(rejection) => Ok(UpdateOutcome::Rejected(rejection)),
        }
    }

    async fn find_redemption(
        &self,
        promotion_id: i64,
        user_id: i64,
    ) -> Result<Option<RedemptionRecord>> {
        let slot = self.slot(promotion_id).await?;
        let guard = slot.lock().await;
        Ok(guard.redemptions.get(&user_id).cloned())
    }

    async fn consume_and_record(&self, promotion_id: i64, user_id: i64) -> Result<ConsumeOutcome> {
        let slot = self.slot(promotion_id).await?;
        let mut guard = slot.lock().await;

        if guard.redemptions.contains_key(&user_id) {
            return Ok(ConsumeOutcome::AlreadyRedeemed);
        }
        if !guard.promo.capacity_available() {
            return Ok(ConsumeOutcome::CapacityExhausted);
        }

        let value = match guard.promo.mode {
            PromoMode::Common => {
                guard.promo.used_count += 1;
                guard.promo.common_value.clone().ok_or_else(|| {
                    anyhow::anyhow!("COMMON promotion {promotion_id} has no stored value")
                })?
            }
            PromoMode::Unique => guard.promo.pool.remove(0),
        };

        if guard.promo.is_exhausted() {
            guard.promo.manual_active = false;
        }

        let record = RedemptionRecord {
            id: self.next_record_id.fetch_add(1, Ordering::Relaxed),
            promotion_id,
            user_id,
            value,
            redeemed_at: Utc::now(),
        };
        guard.redemptions.insert(user_id, record.clone());
        Ok(ConsumeOutcome::Redeemed(record))
    }

    async fn redemptions_for_user(&self, user_id: i64) -> Result<Vec<RedemptionRecord>> {
        let slots: Vec<Arc<Mutex<Slot>>> = self.slots.read().await.values().cloned().collect();
        let mut records = Vec::new();
        for slot in slots {
            let guard = slot.lock().await;
            if let Some(record) = guard.redemptions.get(&user_id) {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at));
        Ok(records)
    }
}
