//! Content digests and self-checking manifests.
//!
//! A manifest is a UTF-8 text file of `path = hexhash` lines in resource
//! order, terminated by a line keyed by the manifest's own file name whose
//! value is the hash of every preceding line. Archives are digested per
//! entry so that re-compressing or re-ordering a jar does not change its
//! digest.

use crate::resource::Resource;
use crate::types::ContentHash;
use crate::SchemaError;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::Path;
use tracing::{debug, warn};

const V1_PREFIX: &str = "digest";
const V2_PREFIX: &str = "digest2";
const V1_SKIPPED_DIR: &str = "META-INF/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestVersion {
    /// SHA-256, archive digests skip `META-INF/`.
    V1,
    /// BLAKE3, every archive entry contributes.
    V2,
}

impl DigestVersion {
    pub fn from_number(n: u32) -> Result<Self, SchemaError> {
        match n {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(SchemaError::UnsupportedDigestVersion(other)),
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// `digest.txt`, `digest2.txt`, or `digest2-<group>.txt` for aux groups.
    pub fn manifest_name(self, group: Option<&str>) -> String {
        let prefix = match self {
            Self::V1 => V1_PREFIX,
            Self::V2 => V2_PREFIX,
        };
        match group {
            Some(g) => format!("{prefix}-{g}.txt"),
            None => format!("{prefix}.txt"),
        }
    }

    fn hasher(self) -> ContentHasher {
        match self {
            Self::V1 => ContentHasher::Sha256(Sha256::new()),
            Self::V2 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

enum ContentHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    fn finish(self) -> ContentHash {
        match self {
            Self::Sha256(h) => ContentHash::new(hex::encode(h.finalize())),
            Self::Blake3(h) => ContentHash::new(h.finalize().to_hex().to_string()),
        }
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Sha256(h) => h.update(buf),
            Self::Blake3(h) => {
                h.update(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn digest_bytes(data: &[u8], version: DigestVersion) -> ContentHash {
    let mut hasher = version.hasher();
    // Writing to an in-memory hasher cannot fail.
    let _ = hasher.write_all(data);
    hasher.finish()
}

/// Digest of a resource's local file.
pub fn compute_digest(resource: &Resource, version: DigestVersion) -> Result<ContentHash, SchemaError> {
    digest_path(resource.local(), resource.is_archive(), version)
}

/// Digest of an arbitrary file, treated as an archive when `archive` is set.
pub fn digest_path(
    path: &Path,
    archive: bool,
    version: DigestVersion,
) -> Result<ContentHash, SchemaError> {
    if archive {
        return digest_archive(path, version);
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = version.hasher();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finish())
}

fn digest_archive(path: &Path, version: DigestVersion) -> Result<ContentHash, SchemaError> {
    let archive_err = |e: zip::result::ZipError| SchemaError::Archive {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .filter(|n| version != DigestVersion::V1 || !n.starts_with(V1_SKIPPED_DIR))
        .map(str::to_owned)
        .collect();
    names.sort();

    let mut hasher = version.hasher();
    for name in &names {
        let mut entry = archive.by_name(name).map_err(archive_err)?;
        hasher.write_all(name.as_bytes())?;
        hasher.write_all(&[0])?;
        io::copy(&mut entry, &mut hasher)?;
    }
    Ok(hasher.finish())
}

/// Ordered `path -> hash` map with a self-verifying serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    name: String,
    version: DigestVersion,
    entries: Vec<(String, ContentHash)>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Digest every resource in parallel and record them in input order.
    pub fn create(
        resources: &[Resource],
        version: DigestVersion,
        group: Option<&str>,
    ) -> Result<Self, SchemaError> {
        let entries = resources
            .par_iter()
            .map(|r| compute_digest(r, version).map(|h| (r.path().to_owned(), h)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_entries(version.manifest_name(group), version, entries)
    }

    pub fn from_entries(
        name: impl Into<String>,
        version: DigestVersion,
        entries: Vec<(String, ContentHash)>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let mut index = HashMap::with_capacity(entries.len());
        for (i, (path, _)) in entries.iter().enumerate() {
            if path == &name || index.insert(path.clone(), i).is_some() {
                return Err(SchemaError::DuplicatePath(path.clone()));
            }
        }
        Ok(Self {
            name,
            version,
            entries,
            index,
        })
    }

    /// Parse and validate a manifest named `name`.
    pub fn parse(data: &[u8], name: &str, version: DigestVersion) -> Result<Self, SchemaError> {
        let corrupt = |reason: String| SchemaError::ManifestCorrupt {
            name: name.to_owned(),
            reason,
        };
        let text = std::str::from_utf8(data).map_err(|e| corrupt(e.to_string()))?;

        let mut entries = Vec::new();
        let mut seen = HashMap::new();
        let mut recorded_self = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((path, hash)) = line.rsplit_once('=') else {
                return Err(corrupt(format!("line {}: missing '='", lineno + 1)));
            };
            let path = path.trim();
            let hash = hash.trim();
            if path.is_empty() || hash.is_empty() {
                return Err(corrupt(format!("line {}: empty field", lineno + 1)));
            }
            if path == name {
                recorded_self = Some(hash.to_owned());
                continue;
            }
            if seen.insert(path.to_owned(), entries.len()).is_some() {
                return Err(corrupt(format!("duplicate entry '{path}'")));
            }
            entries.push((path.to_owned(), ContentHash::new(hash)));
        }

        let Some(recorded) = recorded_self else {
            return Err(corrupt("missing self digest".to_owned()));
        };
        let manifest = Self {
            name: name.to_owned(),
            version,
            entries,
            index: seen,
        };
        let expected = digest_bytes(&manifest.body(), version);
        if expected != recorded.as_str() {
            return Err(corrupt(format!(
                "self digest mismatch: recorded {recorded}, computed {expected}"
            )));
        }
        debug!("parsed manifest {name}: {} entries", manifest.entries.len());
        Ok(manifest)
    }

    /// Load `dir/<name>` where `name` is derived from `version` and `group`.
    pub fn load(dir: &Path, version: DigestVersion, group: Option<&str>) -> Result<Self, SchemaError> {
        let name = version.manifest_name(group);
        let data = fs::read(dir.join(&name))?;
        Self::parse(&data, &name, version)
    }

    fn body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (path, hash) in &self.entries {
            out.extend_from_slice(format!("{path} = {hash}\n").as_bytes());
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.body();
        let own = digest_bytes(&out, self.version);
        out.extend_from_slice(format!("{} = {own}\n", self.name).as_bytes());
        out
    }

    /// Atomically write the manifest into `dir`, returning its path.
    pub fn write_to(&self, dir: &Path) -> Result<std::path::PathBuf, SchemaError> {
        let dest = dir.join(&self.name);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| SchemaError::Io(e.error))?;
        Ok(dest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> DigestVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ContentHash> {
        self.index.get(path).map(|&i| &self.entries[i].1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ContentHash)> {
        self.entries.iter().map(|(p, h)| (p.as_str(), h))
    }

    /// True when the resource's local file matches its recorded digest.
    pub fn validate_resource(&self, resource: &Resource) -> bool {
        self.validate_file(resource, resource.local())
    }

    /// Compare the file at `path` against the digest recorded for `resource`.
    pub fn validate_file(&self, resource: &Resource, path: &Path) -> bool {
        let Some(expected) = self.get(resource.path()) else {
            warn!("{} has no entry in {}", resource.path(), self.name);
            return false;
        };
        match digest_path(path, resource.is_archive(), self.version) {
            Ok(actual) if &actual == expected => true,
            Ok(actual) => {
                debug!(
                    "digest mismatch for {}: expected {expected}, got {actual}",
                    resource.path()
                );
                false
            }
            Err(SchemaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} is missing", path.display());
                false
            }
            Err(e) => {
                warn!("failed to digest {}: {e}", path.display());
                false
            }
        }
    }

    /// Resources whose local files fail validation, in input order.
    pub fn verify_resources(&self, resources: &[Resource]) -> Vec<Resource> {
        resources
            .par_iter()
            .filter(|r| !self.validate_resource(r))
            .cloned()
            .collect()
    }
}
