use crate::PatchError;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub(crate) fn normalized_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Re-compress every entry of `src` into `dest` with deflate and a fixed
/// timestamp, preserving entry order. Two archives with identical entry
/// contents rebuild to identical CRCs, sizes and compressed payloads.
pub fn rebuild_archive(src: &Path, dest: &Path) -> Result<usize, PatchError> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(src)?))?;
    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = normalized_options();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_owned();
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }
        writer.start_file(name, options)?;
        io::copy(&mut entry, &mut writer)?;
    }
    let count = archive.len();
    writer.finish()?;
    debug!("rebuilt {} ({count} entries)", src.display());
    Ok(count)
}
