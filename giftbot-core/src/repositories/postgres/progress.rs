// File: src/repositories/postgres/progress.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use giftbot_common::models::{CodeProgress, RedemptionRecord, RedemptionStatus};
use giftbot_common::traits::repository_traits::ProgressStore;
use crate::Error;

/// Primary durable backend for redemption tracking.
#[derive(Clone)]
pub struct PostgresProgressStore {
    pool: Pool<Postgres>,
}

impl PostgresProgressStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn record_from_row(r: &sqlx::postgres::PgRow) -> Result<RedemptionRecord, Error> {
    Ok(RedemptionRecord {
        community_id: r.try_get("community_id")?,
        code: r.try_get("code")?,
        account_id: r.try_get("account_id")?,
        status: r
            .try_get::<String, _>("status")?
            .parse::<RedemptionStatus>()
            .map_err(Error::Parse)?,
        attempts: r.try_get("attempts")?,
        last_attempt_at: r.try_get::<DateTime<Utc>, _>("last_attempt_at")?,
    })
}

#[async_trait]
impl ProgressStore for PostgresProgressStore {
    async fn get_code_progress(&self, code: &str) -> Result<Option<CodeProgress>, Error> {
        let row = sqlx::query(
            r#"
            SELECT code, globally_processed, updated_at
            FROM code_progress
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(r) = row {
            Ok(Some(CodeProgress {
                code: r.try_get("code")?,
                globally_processed: r.try_get("globally_processed")?,
                updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn set_globally_processed(&self, code: &str, processed: bool) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO code_progress (code, globally_processed, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
               SET globally_processed = EXCLUDED.globally_processed,
                   updated_at         = EXCLUDED.updated_at
            "#,
        )
        .bind(code)
        .bind(processed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT code FROM code_progress
            WHERE globally_processed = FALSE
            ORDER BY updated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut codes = Vec::with_capacity(rows.len());
        for r in rows {
            codes.push(r.try_get("code")?);
        }
        Ok(codes)
    }

    async fn upsert_record(&self, record: &RedemptionRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO redemption_records (
                community_id, code, account_id, status, attempts, last_attempt_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (community_id, code, account_id) DO UPDATE
               SET status          = EXCLUDED.status,
                   attempts        = EXCLUDED.attempts,
                   last_attempt_at = EXCLUDED.last_attempt_at
            "#,
        )
        .bind(record.community_id)
        .bind(&record.code)
        .bind(&record.account_id)
        .bind(record.status.to_string())
        .bind(record.attempts)
        .bind(record.last_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record(
        &self,
        community_id: Uuid,
        code: &str,
        account_id: &str,
    ) -> Result<Option<RedemptionRecord>, Error> {
        let row = sqlx::query(
            r#"
            SELECT community_id, code, account_id, status, attempts, last_attempt_at
            FROM redemption_records
            WHERE community_id = $1 AND code = $2 AND account_id = $3
            "#,
        )
        .bind(community_id)
        .bind(code)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(record_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn get_records_for_accounts(
        &self,
        community_id: Uuid,
        code: &str,
        account_ids: &[String],
    ) -> Result<Vec<RedemptionRecord>, Error> {
        // One round trip for the whole roster; looping per-account here once
        // stalled the host process for minutes.
        let rows = sqlx::query(
            r#"
            SELECT community_id, code, account_id, status, attempts, last_attempt_at
            FROM redemption_records
            WHERE community_id = $1 AND code = $2 AND account_id = ANY($3)
            "#,
        )
        .bind(community_id)
        .bind(code)
        .bind(account_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            records.push(record_from_row(&r)?);
        }
        Ok(records)
    }

    async fn delete_records_for_code(&self, code: &str) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM redemption_records WHERE code = $1
            "#,
        )
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
