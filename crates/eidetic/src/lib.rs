//! Eidetic - Weight-tiered multi-store memory cache
//!
//! This crate routes each stored record to one or more specialized tiers,
//! tracks a retention weight per record that decays with disuse and grows
//! with recall, and runs background consolidation that promotes, demotes
//! and associates records. Nothing stored is ever forgotten: weight has a
//! floor and every record stays addressable by id.

pub mod admin;
pub mod config;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod memory;
pub mod router;
pub mod storage;
pub mod synthesis;
pub mod testing;
pub mod tier;

pub use engine::{CacheStats, EideticCache, RecallRequest, RecallResponse, StoreReceipt};
pub use error::EideticError;
