use crate::lifecycle::UpdateState;
use hoist_remote::{DownloadObserver, RemoteError};
use hoist_schema::Resource;
use std::time::Duration;

/// Receives updater state changes and progress. Every method defaults to
/// doing nothing.
pub trait StatusObserver: Send + Sync {
    fn state_changed(&self, _state: UpdateState) {}

    fn download_progress(&self, _percent: u8, _remaining: Option<Duration>) {}

    fn patch_progress(&self, _percent: u8) {}

    fn resource_failed(&self, _resource: &Resource, _error: &RemoteError) {}
}

pub struct SilentStatus;

impl StatusObserver for SilentStatus {}

/// Presents a [`StatusObserver`] to the downloader.
pub(crate) struct DownloadRelay<'a>(pub(crate) &'a dyn StatusObserver);

impl DownloadObserver for DownloadRelay<'_> {
    fn progress(&self, percent: u8, remaining: Option<Duration>) {
        self.0.download_progress(percent, remaining);
    }

    fn resource_failed(&self, resource: &Resource, error: &RemoteError) {
        self.0.resource_failed(resource, error);
    }
}
