//! Resource model, application descriptor, digest manifests and signatures for hoist.
//!
//! This crate defines what "up to date" means: every tracked file is a
//! [`Resource`] identified by its relative path, the publisher records the
//! expected content hash of each one in a self-checking [`Manifest`], and
//! installers compare freshly computed digests against it. The TOML
//! [`AppDescriptor`] lists the resources and auxiliary groups of an
//! application; detached Ed25519 signatures optionally authenticate manifests.

pub mod descriptor;
pub mod digest;
pub mod resource;
pub mod signature;
pub mod types;

pub use descriptor::{
    encode_path, parse_descriptor_file, parse_descriptor_str, AppDescriptor, AuxSection, CacheSection,
    LaunchSection, DESCRIPTOR_FILE,
};
pub use digest::{compute_digest, digest_bytes, digest_path, DigestVersion, Manifest};
pub use resource::{is_archive, validate_resource_path, AuxGroup, Resource, ResourceKind};
pub use signature::{
    public_key_base64, sign_manifest, signature_path, signing_key_from_base64,
    verify_manifest_signature,
};
pub use types::{AuxName, ContentHash};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported descriptor_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("unsupported digest_version: {0}, expected 1 or 2")]
    UnsupportedDigestVersion(u32),
    #[error("appbase must not be empty")]
    EmptyAppbase,
    #[error("appbase '{0}' contains %VERSION% but the descriptor has no version")]
    UnversionedAppbase(String),
    #[error("duplicate resource path: {0}")]
    DuplicatePath(String),
    #[error("invalid resource path: '{0}'")]
    InvalidPath(String),
    #[error("unpack entry '{0}' is not a declared resource")]
    UnknownUnpack(String),
    #[error("invalid aux group name: '{0}'")]
    InvalidAuxName(String),
    #[error("archive error in {path}: {reason}")]
    Archive { path: String, reason: String },
    #[error("manifest '{name}' is corrupt: {reason}")]
    ManifestCorrupt { name: String, reason: String },
    #[error("manifest signature rejected: {0}")]
    BadSignature(String),
}
