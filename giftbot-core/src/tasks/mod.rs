// File: src/tasks/mod.rs

pub mod startup_reconciliation;
