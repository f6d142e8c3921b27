//! Archive patch codec for hoist.
//!
//! A patch file is a zip whose entries are named after resource paths with a
//! `.create`, `.patch` or `.delete` suffix. `.patch` payloads are themselves
//! archive diffs: a zip carrying only the entries whose content is new,
//! plus a `META-INF/INDEX.JD` index listing entries to `remove` from the old
//! archive and entries to `move` (copy under a new name) out of it.

pub mod archive;
pub mod differ;
pub mod index;
pub mod patcher;
pub mod rebuild;

pub use archive::{apply_archive_patch, diff_archives, ArchiveDiffStats};
pub use differ::{create_patch, patch_file_name, PatchSummary};
pub use index::{DiffIndex, INDEX_ENTRY};
pub use patcher::apply_patch_file;
pub use rebuild::rebuild_archive;

use thiserror::Error;

pub const CREATE_SUFFIX: &str = ".create";
pub const PATCH_SUFFIX: &str = ".patch";
pub const DELETE_SUFFIX: &str = ".delete";

/// Receives patch application progress as a percentage.
pub trait PatchObserver {
    fn progress(&self, percent: u8);
}

impl<F: Fn(u8)> PatchObserver for F {
    fn progress(&self, percent: u8) {
        self(percent);
    }
}

/// Observer that discards progress.
pub struct NoProgress;

impl PatchObserver for NoProgress {
    fn progress(&self, _percent: u8) {}
}

/// Forwards only strictly increasing percentages. Work in progress tops out
/// at 99; only [`finish`](Self::finish) reports 100.
pub(crate) struct MonotonicProgress<'a> {
    inner: &'a dyn PatchObserver,
    last: std::cell::Cell<Option<u8>>,
}

impl<'a> MonotonicProgress<'a> {
    pub(crate) fn new(inner: &'a dyn PatchObserver) -> Self {
        Self {
            inner,
            last: std::cell::Cell::new(None),
        }
    }

    pub(crate) fn report(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let pct = (done.min(total) * 100 / total).min(99) as u8;
        self.emit(pct);
    }

    /// The output is in place.
    pub(crate) fn finish(&self) {
        self.emit(100);
    }

    fn emit(&self, pct: u8) {
        if matches!(self.last.get(), Some(last) if pct <= last) {
            return;
        }
        self.last.set(Some(pct));
        self.inner.progress(pct);
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Schema(#[from] hoist_schema::SchemaError),
    #[error("malformed diff index: {0}")]
    BadIndex(String),
    #[error("move source '{0}' is not present in the old archive")]
    BadMove(String),
    #[error("patch entry '{0}' escapes the application directory")]
    UnsafePath(String),
    #[error("entry name '{0}' is reserved for the diff index")]
    ReservedName(String),
}
