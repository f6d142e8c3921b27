use crate::layout::{check_extension, check_hash, CacheLayout, LAST_ACCESSED_SUFFIX};
use crate::StoreError;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use hoist_schema::ContentHash;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A cached file and the last time a launch used it.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub hash: ContentHash,
    pub path: PathBuf,
    pub size: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResourceCache {
    layout: CacheLayout,
}

impl ResourceCache {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Copy `source` into the cache under `hash` and refresh its marker.
    ///
    /// Existing content is never rewritten. Concurrent callers racing on the
    /// same entry both succeed; the first completed copy wins.
    pub fn cache_file(
        &self,
        source: &Path,
        hash: &ContentHash,
        ext: &str,
    ) -> Result<PathBuf, StoreError> {
        check_hash(hash)?;
        check_extension(ext)?;
        let dir = self.layout.entry_dir(hash);
        fs::create_dir_all(&dir)?;

        let dest = self.layout.entry_path(hash, ext);
        if !dest.exists() {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            io::copy(&mut BufReader::new(File::open(source)?), &mut tmp)?;
            tmp.as_file().sync_all()?;
            match tmp.persist_noclobber(&dest) {
                Ok(_) => debug!("cached {} as {}", source.display(), dest.display()),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{} was cached concurrently", dest.display());
                }
                Err(e) => return Err(StoreError::Io(e.error)),
            }
        }

        let marker = self.layout.marker_path(hash, ext);
        touch(&marker)?;
        Ok(dest)
    }

    /// Every complete entry/marker pair, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let root = self.layout.root();
        if !root.exists() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable cache path: {e}");
                    continue;
                }
            };
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(target_name) = name.strip_suffix(LAST_ACCESSED_SUFFIX) else {
                continue;
            };
            let target = path.with_file_name(target_name);
            let Ok(target_meta) = fs::metadata(&target) else {
                continue;
            };
            let Ok(last_accessed) = modified(path) else {
                continue;
            };
            let hash = target_name.split('.').next().unwrap_or(target_name);
            out.push(CacheEntry {
                hash: ContentHash::new(hash),
                path: target,
                size: target_meta.len(),
                last_accessed,
            });
        }
        out.sort_by_key(|e| e.last_accessed);
        out
    }
}

/// Create `marker` if absent and set its modification time to now.
pub(crate) fn touch(marker: &Path) -> Result<(), StoreError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(marker)?;
    filetime::set_file_mtime(marker, FileTime::now())?;
    Ok(())
}

pub(crate) fn modified(path: &Path) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}
