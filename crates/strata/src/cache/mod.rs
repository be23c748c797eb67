//! Request/response caching, independent of the memory tiers
//!
//! [`TieredCache`] combines the in-process [`L1Cache`] with a shared
//! [`L2Backend`]; [`SemanticCache`] adds embedding-similarity lookup on top.

pub mod l1;
pub mod l2;
pub mod semantic;
pub mod tiered;

pub use l1::{CacheRecord, L1Cache, L1Stats};
pub use l2::{KvL2Backend, L2Backend};
pub use semantic::{SemanticCache, SemanticHit, SemanticStats, semantic_key};
pub use tiered::{CacheStats, SetOutcome, TieredCache};
