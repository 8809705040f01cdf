// File: src/repositories/mod.rs

pub mod dual;
pub mod postgres;
pub mod sqlite;

pub use dual::DualProgressStore;
pub use giftbot_common::traits::repository_traits::{
    CodeRepository, CommunityRepository, PriorityRepository, ProgressStore,
    ReactivationHistoryRepository, RequirementRepository,
};
