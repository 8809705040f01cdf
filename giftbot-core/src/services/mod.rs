// File: src/services/mod.rs

pub mod redeem;
