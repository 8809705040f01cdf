// File: src/repositories/postgres/communities.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use giftbot_common::models::Community;
use giftbot_common::traits::repository_traits::CommunityRepository;
use crate::Error;

#[derive(Clone)]
pub struct PostgresCommunityRepository {
    pool: Pool<Postgres>,
}

impl PostgresCommunityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn community_from_row(r: &sqlx::postgres::PgRow) -> Result<Community, Error> {
    Ok(Community {
        community_id: r.try_get("community_id")?,
        name: r.try_get("name")?,
        auto_redeem_enabled: r.try_get("auto_redeem_enabled")?,
        notification_channel: r.try_get("notification_channel")?,
    })
}

#[async_trait]
impl CommunityRepository for PostgresCommunityRepository {
    async fn get_community(&self, community_id: Uuid) -> Result<Option<Community>, Error> {
        let row = sqlx::query(
            r#"
            SELECT community_id, name, auto_redeem_enabled, notification_channel
            FROM communities
            WHERE community_id = $1
            "#,
        )
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(community_from_row(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_enabled_communities(&self) -> Result<Vec<Community>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT community_id, name, auto_redeem_enabled, notification_channel
            FROM communities
            WHERE auto_redeem_enabled = TRUE
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut communities = Vec::with_capacity(rows.len());
        for r in rows {
            communities.push(community_from_row(&r)?);
        }
        Ok(communities)
    }

    async fn upsert_community(&self, community: &Community) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO communities (community_id, name, auto_redeem_enabled, notification_channel)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (community_id) DO UPDATE
               SET name                 = EXCLUDED.name,
                   auto_redeem_enabled  = EXCLUDED.auto_redeem_enabled,
                   notification_channel = EXCLUDED.notification_channel
            "#,
        )
        .bind(community.community_id)
        .bind(&community.name)
        .bind(community.auto_redeem_enabled)
        .bind(&community.notification_channel)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
