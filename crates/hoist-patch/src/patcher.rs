use crate::archive::apply_archive_patch;
use crate::differ::PatchSummary;
use crate::{MonotonicProgress, PatchError, PatchObserver, CREATE_SUFFIX, DELETE_SUFFIX, PATCH_SUFFIX};
use hoist_schema::validate_resource_path;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

enum Action {
    Create,
    Patch,
    Delete,
}

fn classify(entry: &str) -> Option<(&str, Action)> {
    if let Some(path) = entry.strip_suffix(CREATE_SUFFIX) {
        Some((path, Action::Create))
    } else if let Some(path) = entry.strip_suffix(PATCH_SUFFIX) {
        Some((path, Action::Patch))
    } else {
        entry
            .strip_suffix(DELETE_SUFFIX)
            .map(|path| (path, Action::Delete))
    }
}

fn target_path(app_dir: &Path, path: &str) -> Result<PathBuf, PatchError> {
    validate_resource_path(path).map_err(|_| PatchError::UnsafePath(path.to_owned()))?;
    Ok(app_dir.join(path))
}

/// Scales nested archive progress into the slot of one patch entry.
struct EntrySlot<'a> {
    outer: &'a MonotonicProgress<'a>,
    index: usize,
    count: usize,
}

impl PatchObserver for EntrySlot<'_> {
    fn progress(&self, percent: u8) {
        self.outer.report(
            self.index * 100 + usize::from(percent),
            self.count * 100,
        );
    }
}

/// Apply the patch file at `patch` to the installation in `app_dir`.
pub fn apply_patch_file(
    app_dir: &Path,
    patch: &Path,
    observer: &dyn PatchObserver,
) -> Result<PatchSummary, PatchError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(patch)?))?;
    let count = archive.len();
    let progress = MonotonicProgress::new(observer);
    let mut summary = PatchSummary::default();

    for i in 0..count {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_owned();
        let Some((path, action)) = classify(&name) else {
            warn!("ignoring unrecognized patch entry {name}");
            continue;
        };
        let target = target_path(app_dir, path)?;

        match action {
            Action::Create => {
                write_atomic(&target, &mut entry)?;
                debug!("created {path}");
                summary.created.push(path.to_owned());
            }
            Action::Patch => {
                let parent = target.parent().unwrap_or(app_dir);
                let mut diff = tempfile::NamedTempFile::new_in(parent)?;
                io::copy(&mut entry, &mut diff)?;
                drop(entry);
                let slot = EntrySlot {
                    outer: &progress,
                    index: i,
                    count,
                };
                apply_archive_patch(&target, diff.path(), &target, &slot)?;
                debug!("patched {path}");
                summary.patched.push(path.to_owned());
            }
            Action::Delete => {
                match fs::remove_file(&target) {
                    Ok(()) => debug!("deleted {path}"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to delete {}: {e}", target.display()),
                }
                summary.deleted.push(path.to_owned());
            }
        }
        progress.report(i + 1, count);
    }

    progress.finish();
    info!(
        "applied {}: {} created, {} patched, {} deleted",
        patch.display(),
        summary.created.len(),
        summary.patched.len(),
        summary.deleted.len()
    );
    Ok(summary)
}

fn write_atomic(target: &Path, content: &mut dyn Read) -> Result<(), PatchError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    io::copy(content, &mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| PatchError::Io(e.error))?;
    Ok(())
}
