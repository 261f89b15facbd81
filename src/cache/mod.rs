//! Cache Store Registry
//!
//! Named, versioned key -> response stores shared by every caching strategy.

pub mod backend;
pub mod keys;
pub mod record;
pub mod registry;

pub use backend::{MemoryBackend, SledBackend, StoreBackend, StoreError};
pub use keys::RequestKey;
pub use record::{
    is_hop_by_hop, ResponseRecord, CACHED_AT_HEADER, PERMANENT_CACHE_CONTROL, SOURCE_HEADER,
};
pub use registry::{CacheRegistry, CacheStore, RegistryStats, StoreNames, StoreRole};
