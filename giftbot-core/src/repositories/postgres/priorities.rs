// File: src/repositories/postgres/priorities.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;
use uuid::Uuid;

use giftbot_common::models::{AlliancePriority, PriorityLevel};
use giftbot_common::traits::repository_traits::PriorityRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresPriorityRepository {
    pool: Pool<Postgres>,
}

impl PostgresPriorityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriorityRepository for PostgresPriorityRepository {
    async fn get_priorities(&self, community_id: Uuid) -> Result<Vec<AlliancePriority>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT community_id, alliance_id, priority_level
            FROM alliance_redemption_priority
            WHERE community_id = $1
            "#,
        )
        .bind(community_id)
        .fetch_all(&self.pool)
        .await?;

        let mut priorities = Vec::with_capacity(rows.len());
        for r in rows {
            priorities.push(AlliancePriority {
                community_id: r.try_get("community_id")?,
                alliance_id: r.try_get("alliance_id")?,
                level: PriorityLevel::from_str(&r.try_get::<String, _>("priority_level")?)
                    .map_err(Error::Parse)?,
            });
        }
        Ok(priorities)
    }

    async fn set_priority(
        &self,
        community_id: Uuid,
        alliance_id: Uuid,
        level: PriorityLevel,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO alliance_redemption_priority (community_id, alliance_id, priority_level)
            VALUES ($1, $2, $3)
            ON CONFLICT (community_id, alliance_id) DO UPDATE
               SET priority_level = EXCLUDED.priority_level
            "#,
        )
        .bind(community_id)
        .bind(alliance_id)
        .bind(level.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
