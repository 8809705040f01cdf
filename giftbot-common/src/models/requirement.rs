// File: giftbot-common/src/models/requirement.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Account;

/// Per-code eligibility requirements, either set by an operator or learned
/// the hard way from a VIP/level error returned by the redemption API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CodeRequirement {
    pub code: String,
    pub vip_required: bool,
    pub min_level: i32,
    pub learned_from_error: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for CodeRequirement {
    fn default() -> Self {
        Self::none("")
    }
}

impl CodeRequirement {
    pub fn none(code: &str) -> Self {
        Self {
            code: code.to_string(),
            vip_required: false,
            min_level: 0,
            learned_from_error: false,
            updated_at: Utc::now(),
        }
    }

    /// Why the account cannot redeem this code, if it cannot.
    ///
    /// An account whose VIP status was never observed is given the benefit of
    /// the doubt; the API will tell us if we are wrong.
    pub fn skip_reason(&self, account: &Account) -> Option<&'static str> {
        if self.vip_required && account.is_vip == Some(false) {
            return Some("vip_required");
        }
        if account.level < self.min_level {
            return Some("level_too_low");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requirement_constrains_nothing() {
        let req = CodeRequirement::default();
        let account = Account {
            account_id: "1".to_string(),
            display_name: "p".to_string(),
            level: 0,
            alliance_id: None,
            is_vip: Some(false),
        };
        assert!(req.skip_reason(&account).is_none());
        assert!(!req.vip_required);
        assert_eq!(req.min_level, 0);
    }
}
