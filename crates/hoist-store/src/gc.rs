use crate::cache::modified;
use crate::layout::{LAST_ACCESSED_SUFFIX, UNPACKED_SUFFIX};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How long an unused cache entry survives.
///
/// A non-positive retention collects every entry, and the collection runs
/// before the cache is repopulated rather than after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention(Duration);

impl Retention {
    pub fn new(period: Duration) -> Self {
        Self(period)
    }

    pub fn days(days: i64) -> Self {
        Self(Duration::try_days(days).unwrap_or(Duration::MAX))
    }

    pub fn period(self) -> Duration {
        self.0
    }

    pub fn is_unconditional(self) -> bool {
        self.0 <= Duration::zero()
    }

    fn is_stale(self, marker: &Path) -> bool {
        if self.is_unconditional() {
            return true;
        }
        match modified(marker) {
            Ok(at) => Utc::now().signed_duration_since(at) > self.0,
            Err(e) => {
                warn!("cannot read {}: {e}", marker.display());
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GcReport {
    /// Entries evicted because their marker was older than the retention.
    pub expired: Vec<PathBuf>,
    /// Files found without their companion.
    pub orphans: Vec<PathBuf>,
    pub removed_dirs: usize,
    pub kept: usize,
}

impl GcReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.orphans.len()
    }
}

/// Evicts stale and orphaned entries below a cache root.
///
/// Filesystem errors never abort a collection; they are logged and the
/// affected entry is skipped.
pub struct GarbageCollector {
    root: PathBuf,
}

impl GarbageCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collect a prefix-sharded code cache.
    pub fn collect(&self, retention: Retention) -> GcReport {
        let mut report = GcReport::default();
        if !self.root.exists() {
            return report;
        }

        for entry in WalkDir::new(&self.root).min_depth(1).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable cache path: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_dir() {
                if remove_if_empty(path) {
                    report.removed_dirs += 1;
                }
                continue;
            }
            // The companion of an earlier entry may already be gone.
            if fs::symlink_metadata(path).is_err() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match name.strip_suffix(LAST_ACCESSED_SUFFIX) {
                Some(target_name) => {
                    let target = path.with_file_name(target_name);
                    if !target.exists() {
                        remove_file(path, &mut report.orphans);
                    } else if retention.is_stale(path) {
                        remove_file(&target, &mut report.expired);
                        remove_file(path, &mut Vec::new());
                    } else {
                        report.kept += 1;
                    }
                }
                None => {
                    let marker = sibling_with_suffix(path, LAST_ACCESSED_SUFFIX);
                    if !marker.exists() {
                        remove_file(path, &mut report.orphans);
                    }
                }
            }
        }

        info!(
            "collected {}: {} expired, {} orphans, {} kept",
            self.root.display(),
            report.expired.len(),
            report.orphans.len(),
            report.kept
        );
        report
    }

    /// Collect a native cache, where each hash owns a whole directory.
    ///
    /// A directory is removed when its archive/marker pair is stale, when
    /// either half is missing, or when it holds no archive at all.
    pub fn collect_native(&self, retention: Retention) -> GcReport {
        let mut report = GcReport::default();
        let dirs = match fs::read_dir(&self.root) {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                warn!("cannot list {}: {e}", self.root.display());
                return report;
            }
        };

        for dir in dirs.flatten() {
            let path = dir.path();
            if !path.is_dir() {
                remove_file(&path, &mut report.orphans);
                continue;
            }
            let Some(hash) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };

            match native_pair(&path, &hash) {
                Some((_, marker)) if !retention.is_stale(&marker) => report.kept += 1,
                Some((archive, _)) => {
                    if remove_dir(&path) {
                        report.expired.push(archive);
                    }
                }
                None => {
                    if remove_dir(&path) {
                        report.orphans.push(path);
                    }
                }
            }
        }

        info!(
            "collected native cache {}: {} expired, {} orphaned dirs, {} kept",
            self.root.display(),
            report.expired.len(),
            report.orphans.len(),
            report.kept
        );
        report
    }
}

/// The `<hash>.<ext>` archive and its marker inside a native entry directory.
fn native_pair(dir: &Path, hash: &str) -> Option<(PathBuf, PathBuf)> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(hash)
            || name.ends_with(LAST_ACCESSED_SUFFIX)
            || name.ends_with(UNPACKED_SUFFIX)
            || !entry.path().is_file()
        {
            continue;
        }
        let archive = entry.path();
        let marker = sibling_with_suffix(&archive, LAST_ACCESSED_SUFFIX);
        return marker.exists().then_some((archive, marker));
    }
    None
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn remove_file(path: &Path, removed: &mut Vec<PathBuf>) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed {}", path.display());
            removed.push(path.to_path_buf());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {e}", path.display()),
    }
}

fn remove_dir(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("removed {}", path.display());
            true
        }
        Err(e) => {
            warn!("failed to remove {}: {e}", path.display());
            false
        }
    }
}

fn remove_if_empty(path: &Path) -> bool {
    let empty = fs::read_dir(path).is_ok_and(|mut d| d.next().is_none());
    empty && fs::remove_dir(path).is_ok()
}
