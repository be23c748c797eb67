//! Memory entry model
//!
//! Defines the record type and metadata shared by every storage tier.

pub mod types;

pub use types::{MemoryEntry, MemoryMetadata, StorageTier, content_hash};
