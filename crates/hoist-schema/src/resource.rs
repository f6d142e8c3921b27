use crate::types::AuxName;
use crate::SchemaError;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Whether a resource is placed on the launch classpath or is plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Code,
    Data,
}

/// A file tracked by the updater.
///
/// Identity is the relative `path` alone: an old and a new resource with the
/// same path compare equal even when their content differs, which is what
/// patch generation matches on.
#[derive(Debug, Clone)]
pub struct Resource {
    path: String,
    remote: String,
    local: PathBuf,
    kind: ResourceKind,
    unpack: bool,
    native: bool,
}

impl Resource {
    pub fn new(
        path: impl Into<String>,
        remote: impl Into<String>,
        local: impl Into<PathBuf>,
        kind: ResourceKind,
    ) -> Self {
        Self {
            path: path.into(),
            remote: remote.into(),
            local: local.into(),
            kind,
            unpack: false,
            native: false,
        }
    }

    /// A resource with no remote location, used by publisher tooling that
    /// only digests and diffs local trees.
    pub fn local_only(path: impl Into<String>, root: &Path, kind: ResourceKind) -> Self {
        let path = path.into();
        let local = root.join(&path);
        Self::new(path, String::new(), local, kind)
    }

    #[must_use]
    pub fn with_unpack(mut self, unpack: bool) -> Self {
        self.unpack = unpack;
        self
    }

    #[must_use]
    pub fn with_native(mut self, native: bool) -> Self {
        self.native = native;
        self
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    #[inline]
    pub fn local(&self) -> &Path {
        &self.local
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub fn unpack(&self) -> bool {
        self.unpack
    }

    #[inline]
    pub fn native(&self) -> bool {
        self.native
    }

    /// Staging location downloads are written to before verification.
    pub fn local_new(&self) -> PathBuf {
        let mut s = self.local.clone().into_os_string();
        s.push("_new");
        PathBuf::from(s)
    }

    /// Sentinel written once an `unpack` resource has been extracted.
    pub fn unpacked_marker(&self) -> PathBuf {
        let mut s = self.local.clone().into_os_string();
        s.push(".unpacked");
        PathBuf::from(s)
    }

    pub fn is_archive(&self) -> bool {
        is_archive(&self.path)
    }

    /// File extension including the leading dot, or an empty string.
    pub fn extension(&self) -> String {
        Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for Resource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Resource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// An optionally-activated named bundle of extra resources.
#[derive(Debug, Clone)]
pub struct AuxGroup {
    pub name: AuxName,
    pub active: bool,
    pub resources: Vec<Resource>,
}

/// True for `.jar` and `.zip` files, which are digested and diffed entry-wise.
pub fn is_archive(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".jar") || lower.ends_with(".zip")
}

/// Reject absolute paths, parent traversal and empty components.
pub fn validate_resource_path(path: &str) -> Result<(), SchemaError> {
    if path.is_empty() || path.contains('\\') || path.ends_with('/') {
        return Err(SchemaError::InvalidPath(path.to_owned()));
    }
    for component in Path::new(path).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(SchemaError::InvalidPath(path.to_owned()));
        }
    }
    Ok(())
}
