use crate::StoreError;
use hoist_schema::ContentHash;
use std::path::{Path, PathBuf};

pub const LAST_ACCESSED_SUFFIX: &str = ".lastAccessed";
pub const UNPACKED_SUFFIX: &str = ".unpacked";
pub const CODE_CACHE_DIR: &str = ".cache";
pub const NATIVE_CACHE_DIR: &str = ".ncache";

/// How a hash maps to its subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharding {
    /// First two hex characters; many entries per directory.
    Prefix,
    /// The whole hash; one entry per directory, used for unpacked natives.
    Full,
}

/// Paths of cache entries below a root directory.
///
/// An entry for hash `h` and extension `.jar` is `<root>/<shard>/h.jar`,
/// its marker `h.jar.lastAccessed` and, for natives, `h.jar.unpacked`.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    sharding: Sharding,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>, sharding: Sharding) -> Self {
        Self {
            root: root.into(),
            sharding,
        }
    }

    /// Code cache of an application: `<app>/.cache`.
    pub fn code(app_dir: &Path) -> Self {
        Self::new(app_dir.join(CODE_CACHE_DIR), Sharding::Prefix)
    }

    /// Native library cache of an application: `<app>/.ncache`.
    pub fn native(app_dir: &Path) -> Self {
        Self::new(app_dir.join(NATIVE_CACHE_DIR), Sharding::Full)
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn sharding(&self) -> Sharding {
        self.sharding
    }

    pub fn shard<'a>(&self, hash: &'a ContentHash) -> &'a str {
        match self.sharding {
            Sharding::Prefix => hash.shard(),
            Sharding::Full => hash.as_str(),
        }
    }

    pub fn entry_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(self.shard(hash))
    }

    pub fn entry_path(&self, hash: &ContentHash, ext: &str) -> PathBuf {
        self.entry_dir(hash).join(format!("{hash}{ext}"))
    }

    pub fn marker_path(&self, hash: &ContentHash, ext: &str) -> PathBuf {
        self.entry_dir(hash)
            .join(format!("{hash}{ext}{LAST_ACCESSED_SUFFIX}"))
    }

    pub fn unpacked_path(&self, hash: &ContentHash, ext: &str) -> PathBuf {
        self.entry_dir(hash)
            .join(format!("{hash}{ext}{UNPACKED_SUFFIX}"))
    }
}

/// Hashes become path components, so only lowercase hex is accepted.
pub(crate) fn check_hash(hash: &ContentHash) -> Result<(), StoreError> {
    let ok = hash.len() >= 2
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidHash(hash.to_string()))
    }
}

/// Extensions are empty or a dot followed by alphanumerics.
pub(crate) fn check_extension(ext: &str) -> Result<(), StoreError> {
    let ok = ext.is_empty()
        || (ext.starts_with('.')
            && ext.len() > 1
            && ext[1..].chars().all(|c| c.is_ascii_alphanumeric()));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidExtension(ext.to_owned()))
    }
}
