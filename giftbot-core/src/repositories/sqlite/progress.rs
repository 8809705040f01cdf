// File: src/repositories/sqlite/progress.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, Row};
use std::str::FromStr;
use uuid::Uuid;

use giftbot_common::models::{CodeProgress, RedemptionRecord, RedemptionStatus};
use giftbot_common::traits::repository_traits::ProgressStore;
use crate::Error;

/// Secondary local backend: same two tables as the postgres store, kept on
/// local disk so tracking survives a primary outage. UUIDs and timestamps are
/// stored as TEXT.
pub struct SqliteProgressStore {
    pub pool: Pool<Sqlite>,
}

impl SqliteProgressStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn record_from_row(r: &sqlx::sqlite::SqliteRow) -> Result<RedemptionRecord, Error> {
    let community_id = Uuid::parse_str(&r.try_get::<String, _>("community_id")?)
        .map_err(|e| Error::Parse(e.to_string()))?;
    let last_attempt_at = DateTime::parse_from_rfc3339(&r.try_get::<String, _>("last_attempt_at")?)
        .map_err(|e| Error::Parse(e.to_string()))?
        .with_timezone(&Utc);
    Ok(RedemptionRecord {
        community_id,
        code: r.try_get("code")?,
        account_id: r.try_get("account_id")?,
        status: RedemptionStatus::from_str(&r.try_get::<String, _>("status")?)
            .map_err(Error::Parse)?,
        attempts: r.try_get("attempts")?,
        last_attempt_at,
    })
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get_code_progress(&self, code: &str) -> Result<Option<CodeProgress>, Error> {
        let row = sqlx::query(
            r#"
            SELECT code, globally_processed, updated_at
            FROM code_progress
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(r) = row {
            let updated_at = DateTime::parse_from_rfc3339(&r.try_get::<String, _>("updated_at")?)
                .map_err(|e| Error::Parse(e.to_string()))?
                .with_timezone(&Utc);
            Ok(Some(CodeProgress {
                code: r.try_get("code")?,
                globally_processed: r.try_get::<i64, _>("globally_processed")? != 0,
                updated_at,
            }))
        } else {
            Ok(None)
        }
    }

    async fn set_globally_processed(&self, code: &str, processed: bool) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO code_progress (code, globally_processed, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (code) DO UPDATE
               SET globally_processed = excluded.globally_processed,
                   updated_at         = excluded.updated_at
            "#,
        )
        .bind(code)
        .bind(processed as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unprocessed_codes(&self) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT code FROM code_progress
            WHERE globally_processed = 0
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
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (community_id, code, account_id) DO UPDATE
               SET status          = excluded.status,
                   attempts        = excluded.attempts,
                   last_attempt_at = excluded.last_attempt_at
            "#,
        )
        .bind(record.community_id.to_string())
        .bind(&record.code)
        .bind(&record.account_id)
        .bind(record.status.to_string())
        .bind(record.attempts)
        .bind(record.last_attempt_at.to_rfc3339())
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
            WHERE community_id = ? AND code = ? AND account_id = ?
            "#,
        )
        .bind(community_id.to_string())
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
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }

        // sqlite has no ANY($n); expand one placeholder per account id but
        // keep it a single query.
        let placeholders = vec!["?"; account_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT community_id, code, account_id, status, attempts, last_attempt_at
            FROM redemption_records
            WHERE community_id = ? AND code = ? AND account_id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(community_id.to_string())
            .bind(code);
        for id in account_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            records.push(record_from_row(&r)?);
        }
        Ok(records)
    }

    async fn delete_records_for_code(&self, code: &str) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM redemption_records WHERE code = ?
            "#,
        )
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
