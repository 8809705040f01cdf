// File: src/repositories/postgres/codes.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;

use giftbot_common::models::{CodeValidity, GiftCode};
use giftbot_common::traits::repository_traits::CodeRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresCodeRepository {
    pool: Pool<Postgres>,
}

impl PostgresCodeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn code_from_row(r: &sqlx::postgres::PgRow) -> Result<GiftCode, Error> {
    Ok(GiftCode {
        code: r.try_get("code")?,
        discovered_at: r.try_get::<DateTime<Utc>, _>("discovered_at")?,
        validity: CodeValidity::from_str(&r.try_get::<String, _>("validity")?)
            .map_err(Error::Parse)?,
    })
}

#[async_trait]
impl CodeRepository for PostgresCodeRepository {
    async fn upsert_code(&self, code: &GiftCode) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO gift_codes (code, discovered_at, validity)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
               SET validity = EXCLUDED.validity
            "#,
        )
        .bind(&code.code)
        .bind(code.discovered_at)
        .bind(code.validity.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_code(&self, code: &str) -> Result<Option<GiftCode>, Error> {
        let row = sqlx::query(
            r#"
            SELECT code, discovered_at, validity
            FROM gift_codes
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(code_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn set_validity(&self, code: &str, validity: CodeValidity) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE gift_codes SET validity = $1 WHERE code = $2
            "#,
        )
        .bind(validity.to_string())
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_codes(&self) -> Result<Vec<GiftCode>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT code, discovered_at, validity
            FROM gift_codes
            ORDER BY discovered_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut codes = Vec::with_capacity(rows.len());
        for r in rows {
            codes.push(code_from_row(&r)?);
        }
        Ok(codes)
    }
}
