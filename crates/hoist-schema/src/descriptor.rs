use crate::digest::DigestVersion;
use crate::resource::{validate_resource_path, AuxGroup, Resource, ResourceKind};
use crate::types::AuxName;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// File name of the descriptor inside an application directory.
pub const DESCRIPTOR_FILE: &str = "app.toml";

const VERSION_TOKEN: &str = "%VERSION%";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppDescriptor {
    pub descriptor_version: u32,
    pub appbase: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default = "default_digest_version")]
    pub digest_version: u32,
    #[serde(default)]
    pub code: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub native: Vec<String>,
    #[serde(default)]
    pub unpack: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_downloads: usize,
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    #[serde(default)]
    pub launch: LaunchSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub aux: Vec<AuxSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LaunchSection {
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default)]
    pub use_code_cache: bool,
    /// Days a cache entry may sit unused before collection. Zero or negative
    /// clears the cache on every launch.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            use_code_cache: false,
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuxSection {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub code: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

fn default_digest_version() -> u32 {
    2
}

fn default_concurrency() -> usize {
    2
}

fn default_retention_days() -> i64 {
    7
}

fn default_active() -> bool {
    true
}

pub fn parse_descriptor_str(input: &str) -> Result<AppDescriptor, SchemaError> {
    let descriptor: AppDescriptor = toml::from_str(input)?;
    descriptor.validate()?;
    Ok(descriptor)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<AppDescriptor, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}

impl AppDescriptor {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.descriptor_version != 1 {
            return Err(SchemaError::UnsupportedVersion(self.descriptor_version));
        }
        if self.appbase.trim().is_empty() {
            return Err(SchemaError::EmptyAppbase);
        }
        if self.appbase.contains(VERSION_TOKEN) && self.version.is_none() {
            return Err(SchemaError::UnversionedAppbase(self.appbase.clone()));
        }
        DigestVersion::from_number(self.digest_version)?;

        let mut seen = HashSet::new();
        let aux_paths = self
            .aux
            .iter()
            .flat_map(|a| a.code.iter().chain(a.resources.iter()));
        for path in self
            .code
            .iter()
            .chain(self.resources.iter())
            .chain(self.native.iter())
            .chain(aux_paths)
        {
            validate_resource_path(path)?;
            if !seen.insert(path.as_str()) {
                return Err(SchemaError::DuplicatePath(path.clone()));
            }
        }
        for path in &self.unpack {
            if !seen.contains(path.as_str()) {
                return Err(SchemaError::UnknownUnpack(path.clone()));
            }
        }

        let mut names = HashSet::new();
        for aux in &self.aux {
            let valid = !aux.name.is_empty()
                && aux
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid || !names.insert(aux.name.as_str()) {
                return Err(SchemaError::InvalidAuxName(aux.name.clone()));
            }
        }
        Ok(())
    }

    pub fn digest_version(&self) -> Result<DigestVersion, SchemaError> {
        DigestVersion::from_number(self.digest_version)
    }

    /// Appbase URL with `%VERSION%` substituted, without a trailing slash.
    pub fn appbase_for(&self, version: Option<u64>) -> String {
        let base = match version {
            Some(v) => self.appbase.replace(VERSION_TOKEN, &v.to_string()),
            None => self.appbase.clone(),
        };
        base.trim_end_matches('/').to_owned()
    }

    /// Primary resources in descriptor order: code, then data, then native.
    pub fn resource_list(&self, app_dir: &Path, version: Option<u64>) -> Vec<Resource> {
        let appbase = self.appbase_for(version);
        let mut out = Vec::new();
        for path in &self.code {
            out.push(self.make_resource(&appbase, app_dir, path, ResourceKind::Code, false));
        }
        for path in &self.resources {
            out.push(self.make_resource(&appbase, app_dir, path, ResourceKind::Data, false));
        }
        for path in &self.native {
            out.push(self.make_resource(&appbase, app_dir, path, ResourceKind::Data, true));
        }
        out
    }

    pub fn aux_groups(&self, app_dir: &Path, version: Option<u64>) -> Vec<AuxGroup> {
        let appbase = self.appbase_for(version);
        self.aux
            .iter()
            .map(|section| {
                let code = section.code.iter().map(|p| {
                    self.make_resource(&appbase, app_dir, p, ResourceKind::Code, false)
                });
                let data = section.resources.iter().map(|p| {
                    self.make_resource(&appbase, app_dir, p, ResourceKind::Data, false)
                });
                AuxGroup {
                    name: AuxName::new(section.name.clone()),
                    active: section.active,
                    resources: code.chain(data).collect(),
                }
            })
            .collect()
    }

    fn make_resource(
        &self,
        appbase: &str,
        app_dir: &Path,
        path: &str,
        kind: ResourceKind,
        native: bool,
    ) -> Resource {
        let remote = format!("{appbase}/{}", encode_path(path));
        Resource::new(path, remote, app_dir.join(path), kind)
            .with_native(native)
            .with_unpack(self.unpack.iter().any(|u| u == path))
    }
}

/// Percent-encode everything outside the URL-safe unreserved set, keeping `/`.
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'/') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
