// File: giftbot-common/src/models/mod.rs
pub mod account;
pub mod code;
pub mod community;
pub mod job;
pub mod priority;
pub mod redemption;
pub mod requirement;

pub use account::Account;
pub use code::{CodeProgress, CodeValidity, GiftCode, ReactivationEvent, normalize_code};
pub use community::Community;
pub use job::{JobKey, JobSummary};
pub use priority::{AlliancePriority, PriorityLevel};
pub use redemption::{RedemptionRecord, RedemptionStatus};
pub use requirement::CodeRequirement;
