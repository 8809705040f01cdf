// File: src/repositories/postgres/mod.rs

pub mod codes;
pub mod communities;
pub mod priorities;
pub mod progress;
pub mod reactivation;
pub mod requirements;

pub use codes::PostgresCodeRepository;
pub use communities::PostgresCommunityRepository;
pub use priorities::PostgresPriorityRepository;
pub use progress::PostgresProgressStore;
pub use reactivation::PostgresReactivationHistoryRepository;
pub use requirements::PostgresRequirementRepository;
