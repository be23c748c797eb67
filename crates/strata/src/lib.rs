//! Strata - multi-tier cache and memory engine for LLM applications
//!
//! Entries live in a hot key-value tier, a warm document tier and a cold
//! vector tier, and migrate toward colder tiers as they go idle. A separate
//! two-level cache with semantic lookup serves request/response caching.
//! [`StorageContext`] wires everything together.

pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod storage;
pub mod tasks;
pub mod testing;

pub use context::StorageContext;
pub use error::{Result, StrataError};
