// File: src/repositories/postgres/reactivation.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;

use giftbot_common::models::{CodeValidity, ReactivationEvent};
use giftbot_common::traits::repository_traits::ReactivationHistoryRepository;
use crate::Error;

/// Append-only audit log of Invalid/Expired -> Valid transitions.
#[derive(Clone)]
pub struct PostgresReactivationHistoryRepository {
    pool: Pool<Postgres>,
}

impl PostgresReactivationHistoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReactivationHistoryRepository for PostgresReactivationHistoryRepository {
    async fn record_reactivation(&self, event: &ReactivationEvent) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO code_reactivation_history (code, previous_status, reactivated_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&event.code)
        .bind(event.previous_status.to_string())
        .bind(event.reactivated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reactivations(&self, code: &str) -> Result<Vec<ReactivationEvent>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT code, previous_status, reactivated_at
            FROM code_reactivation_history
            WHERE code = $1
            ORDER BY reactivated_at
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for r in rows {
            events.push(ReactivationEvent {
                code: r.try_get("code")?,
                previous_status: CodeValidity::from_str(
                    &r.try_get::<String, _>("previous_status")?,
                )
                .map_err(Error::Parse)?,
                reactivated_at: r.try_get::<DateTime<Utc>, _>("reactivated_at")?,
            });
        }
        Ok(events)
    }
}
