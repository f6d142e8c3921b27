//! Update orchestration for hoist.
//!
//! This crate ties the descriptor and manifests, the patch codec, the
//! resource caches and the downloader together into the [`Updater`]: the
//! state machine that brings an application directory up to its published
//! version and produces a [`LaunchPlan`]. It also provides the per-directory
//! update lock, Ctrl-C abort wiring and transition validation.

pub mod concurrency;
pub mod launch;
pub mod lifecycle;
pub mod observer;
pub mod updater;

pub use concurrency::{install_abort_handler, shutdown_requested, UpdateLock, LOCK_FILE};
pub use launch::{CommandLauncher, LaunchPlan, Launcher, CLASSPATH_ENV, NATIVE_PATH_ENV};
pub use lifecycle::{validate_transition, UpdateState, MAX_UPDATE_LOOPS};
pub use observer::{SilentStatus, StatusObserver};
pub use updater::{UpdateReport, Updater, VERSION_FILE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] hoist_schema::SchemaError),
    #[error("patch error: {0}")]
    Patch(#[from] hoist_patch::PatchError),
    #[error("cache error: {0}")]
    Store(#[from] hoist_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] hoist_remote::RemoteError),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(String),
    #[error("gave up after {attempts} download rounds; still invalid: {}", failed.join(", "))]
    RetriesExhausted { attempts: usize, failed: Vec<String> },
    #[error("update aborted")]
    Aborted,
    #[error("launch failed: {0}")]
    Launch(String),
}
