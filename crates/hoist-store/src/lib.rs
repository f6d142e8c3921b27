//! Content-addressed resource cache and garbage collector for hoist.
//!
//! Code resources shared between application versions are copied into a
//! cache keyed by their content hash and launched from there, so an update
//! can replace the installation while an older version keeps running. Each
//! cached file has a companion `.lastAccessed` marker whose modification
//! time is the only input to eviction. Native library archives get their own
//! cache where each entry lives in a directory named after its hash and is
//! unpacked in place.

pub mod cache;
pub mod gc;
pub mod layout;
pub mod native;
pub mod session;

pub use cache::{CacheEntry, ResourceCache};
pub use gc::{GarbageCollector, GcReport, Retention};
pub use layout::{
    CacheLayout, Sharding, CODE_CACHE_DIR, LAST_ACCESSED_SUFFIX, NATIVE_CACHE_DIR,
    UNPACKED_SUFFIX,
};
pub use native::NativeCache;
pub use session::CacheSession;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("invalid content hash '{0}'")]
    InvalidHash(String),
    #[error("invalid file extension '{0}'")]
    InvalidExtension(String),
}
