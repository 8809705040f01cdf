// File: giftbot-common/src/models/account.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One game identity on a community roster. Supplied by the roster
/// collaborator at job start and treated as immutable for the job's duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The game's player id ("fid"), also the login identifier.
    pub account_id: String,
    pub display_name: String,
    pub level: i32,
    pub alliance_id: Option<Uuid>,
    /// `None` when VIP status has never been observed for this account.
    pub is_vip: Option<bool>,
}
