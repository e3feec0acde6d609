use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::models::promo::{NewPromotion, PromoMode, Promotion, RedemptionRecord, Target};
use crate::store::{ConsumeOutcome, PromotionStore, PromotionUpdate, UpdateOutcome};

const PROMO_COLUMNS: &str = "id, public_id, business_id, description, image_url, mode, capacity, \
     used_count, common_value, pool, active_from, active_until, manual_active, target, \
     like_count, created_at";

/// Postgres-backed promotion store. Capacity consumption takes a row lock
/// (`SELECT ... FOR UPDATE`) so racing redemptions serialize per promotion;
/// the unique index on (promotion_id, user_id) arbitrates duplicate races.
#[derive(Debug, Clone)]
pub struct PgPromotionStore {
    pool: PgPool,
}

impl PgPromotionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_promotion(row: &PgRow) -> Result<Promotion> {
        let mode_raw: String = row.try_get("mode").context("Missing mode column")?;
        let mode = PromoMode::parse(&mode_raw)
            .with_context(|| format!("Unknown promotion mode '{mode_raw}'"))?;

        Ok(Promotion {
            id: row.try_get("id")?,
            public_id: row.try_get::<Uuid, _>("public_id")?,
            business_id: row.try_get("business_id")?,
            description: row.try_get("description")?,
            image_url: row.try_get::<Option<String>, _>("image_url")?,
            mode,
            capacity: row.try_get("capacity")?,
            used_count: row.try_get("used_count")?,
            common_value: row.try_get::<Option<String>, _>("common_value")?,
            pool: row.try_get::<Vec<String>, _>("pool")?,
            active_from: row.try_get::<Option<NaiveDate>, _>("active_from")?,
            active_until: row.try_get::<Option<NaiveDate>, _>("active_until")?,
            manual_active: row.try_get("manual_active")?,
            target: row.try_get::<Json<Target>, _>("target")?.0,
            like_count: row.try_get("like_count")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn row_to_record(row: &PgRow) -> Result<RedemptionRecord> {
        Ok(RedemptionRecord {
            id: row.try_get("id")?,
            promotion_id: row.try_get("promotion_id")?,
            user_id: row.try_get("user_id")?,
            value: row.try_get("value")?,
            redeemed_at: row.try_get::<DateTime<Utc>, _>("redeemed_at")?,
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        err.as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "23505")
    }
}

#[async_trait]
impl PromotionStore for PgPromotionStore {
    async fn get(&self, public_id: Uuid) -> Result<Option<Promotion>> {
        let row = sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promocodes WHERE public_id = $1"
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch promotion by public id")?;

        row.as_ref().map(Self::row_to_promotion).transpose()
    }

    async fn create(&self, promo: NewPromotion) -> Result<Promotion> {
        let row = sqlx::query(&format!(
            "INSERT INTO promocodes (public_id, business_id, description, image_url, mode, \
             capacity, common_value, pool, active_from, active_until, manual_active, target) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {PROMO_COLUMNS}"
        ))
        .bind(promo.public_id)
        .bind(promo.business_id)
        .bind(&promo.description)
        .bind(&promo.image_url)
        .bind(promo.mode.as_str())
        .bind(promo.capacity)
        .bind(&promo.common_value)
        .bind(&promo.pool)
        .bind(promo.active_from)
        .bind(promo.active_until)
        .bind(promo.manual_active)
        .bind(Json(&promo.target))
        .fetch_one(&self.pool)
        .await
        .context("Failed to create promotion")?;

        Self::row_to_promotion(&row)
    }

    async fn apply_update(&self, update: PromotionUpdate) -> Result<UpdateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open update transaction")?;

        // The same row lock consume_and_record takes, so the counters this
        // update validates against cannot be invalidated by a racing
        // redemption before the write commits.
        let row = sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promocodes WHERE id = $1 FOR UPDATE"
        ))
        .bind(update.id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock promotion row for update")?;

        let mut promo = match row {
            Some(row) => Self::row_to_promotion(&row)?,
            None => return Err(anyhow::anyhow!("Promotion {} does not exist", update.id)),
        };

        if let Err(rejection) = update.apply(&mut promo) {
            return Ok(UpdateOutcome::Rejected(rejection));
        }

        sqlx::query(
            "UPDATE promocodes SET description = $1, image_url = $2, capacity = $3, \
             active_from = $4, active_until = $5, manual_active = $6, target = $7 \
             WHERE id = $8",
        )
        .bind(&promo.description)
        .bind(&promo.image_url)
        .bind(promo.capacity)
        .bind(promo.active_from)
        .bind(promo.active_until)
        .bind(promo.manual_active)
        .bind(Json(&promo.target))
        .bind(promo.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update promotion")?;

        tx.commit()
            .await
            .context("Failed to commit update transaction")?;

        Ok(UpdateOutcome::Updated(promo))
    }

    async fn find_redemption(
        &self,
        promotion_id: i64,
        user_id: i64,
    ) -> Result<Option<RedemptionRecord>> {
        let row = sqlx::query(
            "SELECT id, promotion_id, user_id, value, redeemed_at FROM promo_redemptions \
             WHERE promotion_id = $1 AND user_id = $2",
        )
        .bind(promotion_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up redemption record")?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn consume_and_record(&self, promotion_id: i64, user_id: i64) -> Result<ConsumeOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open redemption transaction")?;

        let row = sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promocodes WHERE id = $1 FOR UPDATE"
        ))
        .bind(promotion_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock promotion row")?;

        let promo = match row {
            Some(row) => Self::row_to_promotion(&row)?,
            None => return Err(anyhow::anyhow!("Promotion {promotion_id} does not exist")),
        };

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM promo_redemptions \
             WHERE promotion_id = $1 AND user_id = $2)",
        )
        .bind(promotion_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to check for existing redemption")?;

        if already {
            return Ok(ConsumeOutcome::AlreadyRedeemed);
        }
        if !promo.capacity_available() {
            return Ok(ConsumeOutcome::CapacityExhausted);
        }

        let value = match promo.mode {
            PromoMode::Common => {
                sqlx::query(
                    "UPDATE promocodes SET used_count = used_count + 1, \
                     manual_active = manual_active AND used_count + 1 < capacity \
                     WHERE id = $1",
                )
                .bind(promotion_id)
                .execute(&mut *tx)
                .await
                .context("Failed to consume shared capacity")?;

                promo.common_value.clone().ok_or_else(|| {
                    anyhow::anyhow!("COMMON promotion {promotion_id} has no stored value")
                })?
            }
            PromoMode::Unique => {
                let value = promo.pool.first().cloned().ok_or_else(|| {
                    anyhow::anyhow!("UNIQUE promotion {promotion_id} pool drained under lock")
                })?;

                sqlx::query(
                    "UPDATE promocodes SET pool = pool[2:cardinality(pool)], \
                     manual_active = manual_active AND cardinality(pool) > 1 \
                     WHERE id = $1",
                )
                .bind(promotion_id)
                .execute(&mut *tx)
                .await
                .context("Failed to pop pool entry")?;

                value
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO promo_redemptions (promotion_id, user_id, value) \
             VALUES ($1, $2, $3) \
             RETURNING id, promotion_id, user_id, value, redeemed_at",
        )
        .bind(promotion_id)
        .bind(user_id)
        .bind(&value)
        .fetch_one(&mut *tx)
        .await;

        let record = match inserted {
            Ok(row) => Self::row_to_record(&row)?,
            // A concurrent first-time redemption by the same user won the
            // insert; dropping the transaction rolls the decrement back.
            Err(ref e) if Self::is_unique_violation(e) => {
                tracing::debug!(promotion_id, user_id, "Redemption lost a duplicate-insert race");
                return Ok(ConsumeOutcome::AlreadyRedeemed);
            }
            Err(e) => return Err(e).context("Failed to insert redemption record"),
        };

        tx.commit()
            .await
            .context("Failed to commit redemption transaction")?;

        Ok(ConsumeOutcome::Redeemed(record))
    }

    async fn redemptions_for_user(&self, user_id: i64) -> Result<Vec<RedemptionRecord>> {
        let rows = sqlx::query(
            "SELECT id, promotion_id, user_id, value, redeemed_at FROM promo_redemptions \
             WHERE user_id = $1 ORDER BY redeemed_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user redemptions")?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
