// File: src/repositories/sqlite/mod.rs

pub mod progress;

pub use progress::SqliteProgressStore;
