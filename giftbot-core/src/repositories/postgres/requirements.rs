// File: src/repositories/postgres/requirements.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use giftbot_common::models::CodeRequirement;
use giftbot_common::traits::repository_traits::RequirementRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresRequirementRepository {
    pool: Pool<Postgres>,
}

impl PostgresRequirementRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequirementRepository for PostgresRequirementRepository {
    async fn get_requirement(&self, code: &str) -> Result<Option<CodeRequirement>, Error> {
        let row = sqlx::query(
            r#"
            SELECT code, vip_required, min_level, learned_from_error, updated_at
            FROM gift_code_requirements
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(r) = row {
            Ok(Some(CodeRequirement {
                code: r.try_get("code")?,
                vip_required: r.try_get("vip_required")?,
                min_level: r.try_get("min_level")?,
                learned_from_error: r.try_get("learned_from_error")?,
                updated_at: r.try_get::<DateTime<Utc>, _>("updated_at")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn upsert_requirement(&self, req: &CodeRequirement) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO gift_code_requirements (
                code, vip_required, min_level, learned_from_error, updated_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
               SET vip_required       = EXCLUDED.vip_required,
                   min_level          = EXCLUDED.min_level,
                   learned_from_error = EXCLUDED.learned_from_error,
                   updated_at         = EXCLUDED.updated_at
            "#,
        )
        .bind(&req.code)
        .bind(req.vip_required)
        .bind(req.min_level)
        .bind(req.learned_from_error)
        .bind(req.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_vip_required(&self, code: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO gift_code_requirements (
                code, vip_required, min_level, learned_from_error, updated_at
            )
            VALUES ($1, TRUE, 0, TRUE, $2)
            ON CONFLICT (code) DO UPDATE
               SET vip_required       = TRUE,
                   learned_from_error = TRUE,
                   updated_at         = EXCLUDED.updated_at
            "#,
        )
        .bind(code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raise_min_level(&self, code: &str, min_level: i32) -> Result<(), Error> {
        // GREATEST keeps a higher level learned earlier from being lowered.
        sqlx::query(
            r#"
            INSERT INTO gift_code_requirements (
                code, vip_required, min_level, learned_from_error, updated_at
            )
            VALUES ($1, FALSE, $2, TRUE, $3)
            ON CONFLICT (code) DO UPDATE
               SET min_level          = GREATEST(gift_code_requirements.min_level, EXCLUDED.min_level),
                   learned_from_error = TRUE,
                   updated_at         = EXCLUDED.updated_at
            "#,
        )
        .bind(code)
        .bind(min_level)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
