use crate::archive::diff_archives;
use crate::{PatchError, CREATE_SUFFIX, DELETE_SUFFIX, PATCH_SUFFIX};
use hoist_schema::{compute_digest, DigestVersion, Resource};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// What a patch file does, by resource path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub created: Vec<String>,
    pub patched: Vec<String>,
    pub deleted: Vec<String>,
}

impl PatchSummary {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.patched.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.patched.len() + self.deleted.len()
    }
}

/// `patch12.dat`, or `patch-extras12.dat` for an aux group.
pub fn patch_file_name(old_version: u64, group: Option<&str>) -> String {
    match group {
        Some(g) => format!("patch-{g}{old_version}.dat"),
        None => format!("patch{old_version}.dat"),
    }
}

/// Build a patch turning the `old` resource set into `new` and write it to
/// `out`. Resources are matched by path; unchanged ones are omitted.
pub fn create_patch(
    old: &[Resource],
    new: &[Resource],
    version: DigestVersion,
    out: &Path,
) -> Result<PatchSummary, PatchError> {
    let old_by_path: HashMap<&str, &Resource> = old.iter().map(|r| (r.path(), r)).collect();
    let new_paths: std::collections::HashSet<&str> = new.iter().map(Resource::path).collect();

    let parent = out.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    let scratch = tempfile::tempdir()?;
    let mut summary = PatchSummary::default();

    {
        let mut writer = ZipWriter::new(BufWriter::new(tmp.reopen()?));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        for resource in new {
            match old_by_path.get(resource.path()) {
                Some(previous) => {
                    let before = compute_digest(previous, version)?;
                    let after = compute_digest(resource, version)?;
                    if before == after {
                        continue;
                    }
                    if resource.is_archive() {
                        let diff = scratch.path().join(format!("{}.jd", summary.len()));
                        diff_archives(previous.local(), resource.local(), &diff)?;
                        writer.start_file(format!("{}{PATCH_SUFFIX}", resource.path()), stored)?;
                        io::copy(&mut BufReader::new(File::open(&diff)?), &mut writer)?;
                        debug!("patch entry for {}", resource.path());
                        summary.patched.push(resource.path().to_owned());
                    } else {
                        write_create(&mut writer, resource, deflated)?;
                        summary.created.push(resource.path().to_owned());
                    }
                }
                None => {
                    write_create(&mut writer, resource, deflated)?;
                    summary.created.push(resource.path().to_owned());
                }
            }
        }

        for resource in old {
            if !new_paths.contains(resource.path()) {
                writer.start_file(format!("{}{DELETE_SUFFIX}", resource.path()), stored)?;
                summary.deleted.push(resource.path().to_owned());
            }
        }

        writer.finish()?.flush()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(out).map_err(|e| PatchError::Io(e.error))?;
    info!(
        "wrote {}: {} created, {} patched, {} deleted",
        out.display(),
        summary.created.len(),
        summary.patched.len(),
        summary.deleted.len()
    );
    Ok(summary)
}

fn write_create<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    resource: &Resource,
    options: SimpleFileOptions,
) -> Result<(), PatchError> {
    writer.start_file(format!("{}{CREATE_SUFFIX}", resource.path()), options)?;
    io::copy(&mut BufReader::new(File::open(resource.local())?), writer)?;
    debug!("create entry for {}", resource.path());
    Ok(())
}
