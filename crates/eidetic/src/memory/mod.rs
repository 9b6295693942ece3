//! Memory types and weight operations
//!
//! Defines the record stored by the cache, the pure weight engine that
//! governs retention, and access tracking used for association discovery.

pub mod access;
pub mod types;
pub mod weight;

pub use access::{AccessTracker, DEFAULT_TRACKER_CAPACITY};
pub use types::{ContentKind, MemoryRecord, StoreContext, TierId, Urgency, Warning};
pub use weight::{WeightBands, WeightCategory, WeightConfig, WeightInputs};
