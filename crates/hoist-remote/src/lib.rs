//! Resource downloading for hoist.
//!
//! A [`Downloader`] pulls a batch of [`Resource`](hoist_schema::Resource)s
//! through a [`Transport`] on a bounded pool of worker threads, writing each
//! one to its `_new` staging path and reporting aggregate progress through a
//! [`DownloadObserver`]. [`HttpTransport`] fetches from the appbase;
//! [`PeerTransport`] tries peer mirrors first and hands the batch over to
//! HTTP when a peer is missing or too slow.

pub mod config;
pub mod downloader;
pub mod http;
pub mod peer;
pub mod progress;
pub mod transport;

pub use config::{DownloaderConfig, PeerConfig};
pub use downloader::{AbortHandle, DownloadOutcome, DownloadReport, Downloader, FailedResource};
pub use http::HttpTransport;
pub use peer::PeerTransport;
pub use progress::{DownloadObserver, NoopObserver, ProgressTracker};
pub use transport::{SlowTransferPolicy, Transfer, Transport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transfer of '{path}' too slow: {bytes} bytes in {secs}s")]
    SlowTransfer { path: String, bytes: u64, secs: u64 },
    #[error("download aborted")]
    Aborted,
}
