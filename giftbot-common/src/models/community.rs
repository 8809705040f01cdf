// File: giftbot-common/src/models/community.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An independent group of players with its own roster and auto-redeem
/// configuration. Communities opt in to redemption individually.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Community {
    pub community_id: Uuid,
    pub name: String,
    pub auto_redeem_enabled: bool,
    pub notification_channel: Option<String>,
}
