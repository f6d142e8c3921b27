//! Entry-level diff and patch of zip archives.
//!
//! Entries are matched by content identity. An unchanged entry under the same
//! name is carried over implicitly; an entry whose bytes already exist in the
//! old archive under another name becomes a `move`; only genuinely new
//! content is shipped in the diff.

use crate::index::{DiffIndex, INDEX_ENTRY};
use crate::rebuild::{normalized_options, rebuild_archive};
use crate::{MonotonicProgress, PatchError, PatchObserver};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::{ZipArchive, ZipWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveDiffStats {
    /// Entries carried over unchanged under the same name.
    pub implicit: usize,
    pub moves: usize,
    pub removes: usize,
    /// Entries whose content is shipped in the diff.
    pub written: usize,
}

#[derive(Debug)]
struct EntryInfo {
    name: String,
    crc: u32,
    size: u64,
    is_dir: bool,
}

fn scan<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<EntryInfo>, PatchError> {
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        out.push(EntryInfo {
            name: entry.name().to_owned(),
            crc: entry.crc32(),
            size: entry.size(),
            is_dir: entry.is_dir(),
        });
    }
    Ok(out)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, index: usize) -> Result<Vec<u8>, PatchError> {
    let mut entry = archive.by_index(index)?;
    let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write a diff turning `old` into `new` to `out`. Both inputs are rebuilt
/// with normalized compression first, so the shipped payloads do not depend
/// on how the publisher's tooling packed them.
pub fn diff_archives(old: &Path, new: &Path, out: &Path) -> Result<ArchiveDiffStats, PatchError> {
    let scratch = tempfile::tempdir()?;
    let old_rebuilt = scratch.path().join("old.zip");
    let new_rebuilt = scratch.path().join("new.zip");
    rebuild_archive(old, &old_rebuilt)?;
    rebuild_archive(new, &new_rebuilt)?;

    let mut old_zip = ZipArchive::new(BufReader::new(File::open(&old_rebuilt)?))?;
    let mut new_zip = ZipArchive::new(BufReader::new(File::open(&new_rebuilt)?))?;
    let old_entries = scan(&mut old_zip)?;
    let new_entries = scan(&mut new_zip)?;

    let mut by_name: HashMap<&str, usize> = HashMap::new();
    let mut by_key: HashMap<(u32, u64), Vec<usize>> = HashMap::new();
    for (i, e) in old_entries.iter().enumerate() {
        by_name.entry(e.name.as_str()).or_insert(i);
        if !e.is_dir {
            by_key.entry((e.crc, e.size)).or_default().push(i);
        }
    }

    let mut implicit: HashSet<&str> = HashSet::new();
    let mut moves: Vec<(String, String)> = Vec::new();
    let mut move_sources: HashSet<&str> = HashSet::new();
    let mut move_targets: HashSet<&str> = HashSet::new();
    let mut written: Vec<usize> = Vec::new();

    for (ni, entry) in new_entries.iter().enumerate() {
        if entry.name == INDEX_ENTRY {
            return Err(PatchError::ReservedName(entry.name.clone()));
        }
        if entry.is_dir {
            match by_name.get(entry.name.as_str()) {
                Some(&oi) if old_entries[oi].is_dir => {
                    implicit.insert(old_entries[oi].name.as_str());
                }
                _ => written.push(ni),
            }
            continue;
        }

        let new_bytes = read_entry(&mut new_zip, ni)?;

        if let Some(&oi) = by_name.get(entry.name.as_str()) {
            let old = &old_entries[oi];
            if !old.is_dir
                && old.crc == entry.crc
                && old.size == entry.size
                && read_entry(&mut old_zip, oi)? == new_bytes
            {
                implicit.insert(old.name.as_str());
                continue;
            }
        }

        let mut source = None;
        if let Some(candidates) = by_key.get(&(entry.crc, entry.size)) {
            for &oi in candidates {
                if read_entry(&mut old_zip, oi)? == new_bytes {
                    source = Some(oi);
                    break;
                }
            }
        }
        match source {
            Some(oi) => {
                let src = old_entries[oi].name.as_str();
                moves.push((src.to_owned(), entry.name.clone()));
                move_sources.insert(src);
                move_targets.insert(entry.name.as_str());
            }
            None => written.push(ni),
        }
    }

    // A move consumes its source, so a source that must also stay in place
    // is re-emitted as a move onto itself.
    for (src, _) in moves.clone() {
        if implicit.remove(src.as_str()) {
            moves.push((src.clone(), src));
        }
    }

    let written_names: HashSet<&str> = written
        .iter()
        .map(|&ni| new_entries[ni].name.as_str())
        .collect();
    let removes: Vec<String> = old_entries
        .iter()
        .map(|e| e.name.as_str())
        .filter(|name| {
            !implicit.contains(name)
                && !move_sources.contains(name)
                && !move_targets.contains(name)
                && !written_names.contains(name)
        })
        .map(str::to_owned)
        .collect();

    let index = DiffIndex { removes, moves };
    let mut writer = ZipWriter::new(BufWriter::new(File::create(out)?));
    writer.start_file(INDEX_ENTRY, normalized_options())?;
    writer.write_all(index.render().as_bytes())?;
    for &ni in &written {
        let entry = new_zip.by_index(ni)?;
        writer.raw_copy_file(entry)?;
    }
    writer.finish()?;

    let stats = ArchiveDiffStats {
        implicit: implicit.len(),
        moves: index.moves.len(),
        removes: index.removes.len(),
        written: written.len(),
    };
    debug!(
        "diff {} -> {}: {stats:?}",
        old.display(),
        new.display()
    );
    Ok(stats)
}

/// Apply the archive diff at `patch` to `old`, writing the result to `out`.
///
/// The output is assembled in a temporary file next to `out` and only
/// replaces it once complete, so `out` may be the same path as `old`.
pub fn apply_archive_patch(
    old: &Path,
    patch: &Path,
    out: &Path,
    observer: &dyn PatchObserver,
) -> Result<(), PatchError> {
    let parent = out.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    let progress = MonotonicProgress::new(observer);

    {
        let mut old_zip = ZipArchive::new(BufReader::new(File::open(old)?))?;
        let mut patch_zip = ZipArchive::new(BufReader::new(File::open(patch)?))?;
        let index = {
            let mut entry = patch_zip.by_name(INDEX_ENTRY)?;
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            DiffIndex::parse(&text)?
        };

        let removes: HashSet<&str> = index.removes.iter().map(String::as_str).collect();
        let mut carried: HashSet<String> = old_zip
            .file_names()
            .filter(|n| !removes.contains(n))
            .map(str::to_owned)
            .collect();

        let patch_entries = patch_zip.len().saturating_sub(1);
        let mut total = old_zip.len() + index.moves.len() + patch_entries;
        let mut done = 0;

        let mut writer = ZipWriter::new(BufWriter::new(tmp.reopen()?));

        for i in 0..patch_zip.len() {
            let entry = patch_zip.by_index(i)?;
            if entry.name() == INDEX_ENTRY {
                continue;
            }
            carried.remove(entry.name());
            writer.raw_copy_file(entry)?;
            done += 1;
            progress.report(done, total);
        }

        for (from, to) in &index.moves {
            let Some(source) = old_zip.index_for_name(from) else {
                return Err(PatchError::BadMove(from.clone()));
            };
            let entry = old_zip.by_index(source)?;
            writer.raw_copy_file_rename(entry, to.as_str())?;
            carried.remove(from);
            carried.remove(to);
            done += 1;
            progress.report(done, total);
        }

        for i in 0..old_zip.len() {
            let name = old_zip.name_for_index(i).map(str::to_owned);
            match name {
                Some(name) if carried.remove(&name) => {
                    let entry = old_zip.by_index(i)?;
                    writer.raw_copy_file(entry)?;
                    done += 1;
                }
                _ => total -= 1,
            }
            progress.report(done, total);
        }

        writer.finish()?.flush()?;
        info!(
            "patched {} ({} moves, {} removes, {patch_entries} new entries)",
            old.display(),
            index.moves.len(),
            index.removes.len()
        );
    }

    tmp.as_file().sync_all()?;
    tmp.persist(out).map_err(|e| PatchError::Io(e.error))?;
    progress.finish();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zw = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zw.start_file(*name, SimpleFileOptions::default()).unwrap();
            zw.write_all(data).unwrap();
        }
        zw.finish().unwrap();
    }

    fn read_all(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut out = Vec::new();
        for i in 0..zip.len() {
            let mut e = zip.by_index(i).unwrap();
            let mut buf = Vec::new();
            e.read_to_end(&mut buf).unwrap();
            out.push((e.name().to_owned(), buf));
        }
        out.sort();
        out
    }

    fn read_index(patch: &Path) -> DiffIndex {
        let mut zip = ZipArchive::new(File::open(patch).unwrap()).unwrap();
        let mut text = String::new();
        zip.by_name(INDEX_ENTRY)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        DiffIndex::parse(&text).unwrap()
    }

    fn roundtrip(old: &[(&str, &[u8])], new: &[(&str, &[u8])]) -> (ArchiveDiffStats, DiffIndex) {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("old.jar");
        let new_path = dir.path().join("new.jar");
        let patch = dir.path().join("diff.jar");
        let out = dir.path().join("out.jar");
        write_zip(&old_path, old);
        write_zip(&new_path, new);

        let stats = diff_archives(&old_path, &new_path, &patch).unwrap();
        apply_archive_patch(&old_path, &patch, &out, &crate::NoProgress).unwrap();
        assert_eq!(read_all(&out), read_all(&new_path));
        (stats, read_index(&patch))
    }

    #[test]
    fn renamed_entry_becomes_single_move() {
        let (stats, index) = roundtrip(
            &[("a.txt", b"h1"), ("b.txt", b"h2")],
            &[("a.txt", b"h1"), ("c.txt", b"h2")],
        );
        assert_eq!(
            index.moves,
            vec![("b.txt".to_owned(), "c.txt".to_owned())]
        );
        assert!(index.removes.is_empty());
        assert_eq!(stats.written, 0);
        assert_eq!(stats.implicit, 1);
    }

    #[test]
    fn identical_archives_produce_empty_index() {
        let entries: &[(&str, &[u8])] = &[("x", b"1"), ("y/z", b"2")];
        let (stats, index) = roundtrip(entries, entries);
        assert!(index.is_empty());
        assert_eq!(stats.written, 0);
        assert_eq!(stats.implicit, 2);
    }

    #[test]
    fn deleted_entry_is_removed() {
        let (_, index) = roundtrip(&[("keep", b"k"), ("gone", b"g")], &[("keep", b"k")]);
        assert_eq!(index.removes, vec!["gone".to_owned()]);
    }

    #[test]
    fn modified_entry_is_written_not_removed() {
        let (stats, index) = roundtrip(&[("a", b"old")], &[("a", b"new content")]);
        assert!(index.removes.is_empty());
        assert_eq!(stats.written, 1);
    }

    #[test]
    fn kept_source_of_copy_moves_onto_itself() {
        let (_, index) = roundtrip(
            &[("a", b"shared")],
            &[("a", b"shared"), ("copy", b"shared")],
        );
        assert!(index
            .moves
            .contains(&("a".to_owned(), "copy".to_owned())));
        assert!(index.moves.contains(&("a".to_owned(), "a".to_owned())));
    }

    #[test]
    fn replaced_content_under_existing_name() {
        roundtrip(
            &[("a", b"alpha"), ("b", b"beta")],
            &[("a", b"beta"), ("c", b"gamma")],
        );
    }

    #[test]
    fn swapped_names() {
        let (_, index) = roundtrip(
            &[("a", b"first"), ("b", b"second")],
            &[("a", b"second"), ("b", b"first")],
        );
        assert_eq!(index.moves.len(), 2);
        assert!(index.removes.is_empty());
    }

    #[test]
    fn missing_move_source_is_bad_move() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.jar");
        let patch = dir.path().join("diff.jar");
        write_zip(&old, &[("a", b"1")]);
        let index = DiffIndex {
            removes: vec![],
            moves: vec![("nope".to_owned(), "b".to_owned())],
        };
        write_zip(&patch, &[(INDEX_ENTRY, index.render().as_bytes())]);

        let out = dir.path().join("out.jar");
        let err = apply_archive_patch(&old, &patch, &out, &crate::NoProgress);
        assert!(matches!(err, Err(PatchError::BadMove(name)) if name == "nope"));
        assert!(!out.exists());
    }

    #[test]
    fn patch_in_place_replaces_old() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("app.jar");
        let new = dir.path().join("new.jar");
        let patch = dir.path().join("diff.jar");
        write_zip(&old, &[("a", b"1"), ("b", b"2")]);
        write_zip(&new, &[("a", b"1"), ("c", b"3")]);
        diff_archives(&old, &new, &patch).unwrap();
        apply_archive_patch(&old, &patch, &old, &crate::NoProgress).unwrap();
        assert_eq!(read_all(&old), read_all(&new));
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.jar");
        let new = dir.path().join("new.jar");
        let patch = dir.path().join("diff.jar");
        write_zip(&old, &[("a", b"1"), ("b", b"2"), ("c", b"3"), ("d", b"4")]);
        write_zip(&new, &[("a", b"1"), ("e", b"2"), ("f", b"new")]);
        diff_archives(&old, &new, &patch).unwrap();

        let seen = RefCell::new(Vec::new());
        let obs = |p: u8| seen.borrow_mut().push(p);
        apply_archive_patch(&old, &patch, &dir.path().join("out.jar"), &obs).unwrap();
        let seen = seen.into_inner();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(seen.iter().filter(|&&p| p == 100).count(), 1);
    }

    #[test]
    fn failed_persist_never_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.jar");
        let new = dir.path().join("new.jar");
        let patch = dir.path().join("diff.jar");
        write_zip(&old, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        write_zip(&new, &[("a", b"1"), ("b", b"22"), ("d", b"3")]);
        diff_archives(&old, &new, &patch).unwrap();

        // A non-empty directory cannot be replaced by the finished file.
        let out = dir.path().join("occupied");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("keep"), b"x").unwrap();

        let seen = RefCell::new(Vec::new());
        let obs = |p: u8| seen.borrow_mut().push(p);
        assert!(apply_archive_patch(&old, &patch, &out, &obs).is_err());
        let seen = seen.into_inner();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&p| p <= 99), "{seen:?}");
    }

    #[test]
    fn reserved_index_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.jar");
        let new = dir.path().join("new.jar");
        write_zip(&old, &[("a", b"1")]);
        write_zip(&new, &[(INDEX_ENTRY, b"x")]);
        let err = diff_archives(&old, &new, &dir.path().join("d.jar"));
        assert!(matches!(err, Err(PatchError::ReservedName(_))));
    }
}
