use crate::progress::{DownloadObserver, ProgressTracker};
use crate::transport::{SlowTransferPolicy, Transport};
use crate::RemoteError;
use hoist_schema::Resource;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Cooperative cancellation flag shared with every worker of a batch.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Aborted,
}

#[derive(Debug)]
pub struct FailedResource {
    pub resource: Resource,
    pub error: RemoteError,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub outcome: DownloadOutcome,
    /// Resources whose `_new` file was fully written.
    pub completed: Vec<Resource>,
    pub failed: Vec<FailedResource>,
    pub bytes: u64,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.outcome == DownloadOutcome::Completed && self.failed.is_empty()
    }
}

/// Downloads batches of resources through a transport.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    update_interval: Duration,
    abort: AbortHandle,
}

/// Per-batch state shared by the workers.
struct Batch<'a> {
    tracker: ProgressTracker<'a>,
    observer: &'a dyn DownloadObserver,
    /// Set once any resource has fallen back; later resources skip the primary.
    delegated: AtomicBool,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            update_interval: Duration::from_millis(500),
            abort: AbortHandle::new(),
        }
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Fetch every resource into its `_new` staging file.
    ///
    /// Sizes are discovered first, one resource at a time, then transfers
    /// run on up to `concurrency` threads. A failing resource is recorded and
    /// reported to the observer without affecting the others.
    pub fn download(
        &self,
        resources: &[Resource],
        concurrency: usize,
        observer: &dyn DownloadObserver,
    ) -> DownloadReport {
        let mut failed = Vec::new();
        let mut pending = Vec::new();
        let mut totals = Vec::new();
        let delegated = AtomicBool::new(false);

        for resource in resources {
            if self.abort.is_aborted() {
                break;
            }
            match self.discover_size(resource, &delegated) {
                Ok(size) => {
                    pending.push(resource);
                    totals.push(size.unwrap_or(0));
                }
                Err(error) => {
                    warn!("cannot size {}: {error}", resource.path());
                    observer.resource_failed(resource, &error);
                    failed.push(FailedResource {
                        resource: resource.clone(),
                        error,
                    });
                }
            }
        }

        let batch = Batch {
            tracker: ProgressTracker::new(totals, self.update_interval, observer),
            observer,
            delegated,
        };
        let workers = concurrency.clamp(1, pending.len().max(1));
        info!(
            "downloading {} resources ({} bytes) with {workers} workers via {}",
            pending.len(),
            batch.tracker.total(),
            self.transport.name()
        );

        let (job_tx, job_rx) = crossbeam::channel::unbounded::<usize>();
        let (done_tx, done_rx) = crossbeam::channel::unbounded();
        for index in 0..pending.len() {
            // The receiver outlives this loop, so sending cannot fail.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let batch = &batch;
                let pending = &pending;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        let resource = pending[index];
                        let result = if self.abort.is_aborted() {
                            Err(RemoteError::Aborted)
                        } else {
                            self.fetch(index, resource, batch)
                        };
                        let _ = done_tx.send((index, result));
                    }
                });
            }
        });
        drop(done_tx);

        let aborted = self.abort.is_aborted();
        let mut completed = Vec::new();
        let mut results: Vec<_> = done_rx.iter().collect();
        results.sort_by_key(|(index, _)| *index);
        for (index, result) in results {
            let resource = pending[index];
            match result {
                Ok(bytes) => {
                    debug!("fetched {} ({bytes} bytes)", resource.path());
                    completed.push(resource.clone());
                }
                Err(RemoteError::Aborted) => {
                    let _ = fs::remove_file(resource.local_new());
                }
                Err(error) => {
                    let _ = fs::remove_file(resource.local_new());
                    warn!("failed to fetch {}: {error}", resource.path());
                    batch.observer.resource_failed(resource, &error);
                    failed.push(FailedResource {
                        resource: resource.clone(),
                        error,
                    });
                }
            }
        }

        batch.tracker.finish(aborted);
        let outcome = if aborted {
            DownloadOutcome::Aborted
        } else {
            DownloadOutcome::Completed
        };
        DownloadReport {
            outcome,
            completed,
            failed,
            bytes: batch.tracker.downloaded(),
        }
    }

    fn discover_size(
        &self,
        resource: &Resource,
        delegated: &AtomicBool,
    ) -> Result<Option<u64>, RemoteError> {
        let primary = self.transport.as_ref();
        match primary.fallback() {
            Some(fallback) if delegated.load(Ordering::SeqCst) => fallback.probe_size(resource),
            Some(fallback) => primary.probe_size(resource).or_else(|e| {
                debug!("{} probe failed ({e}), using {}", primary.name(), fallback.name());
                delegated.store(true, Ordering::SeqCst);
                fallback.probe_size(resource)
            }),
            None => primary.probe_size(resource),
        }
    }

    fn fetch(&self, index: usize, resource: &Resource, batch: &Batch<'_>) -> Result<u64, RemoteError> {
        let primary = self.transport.as_ref();
        let Some(fallback) = primary.fallback() else {
            return self.stream(index, resource, primary, batch);
        };
        if batch.delegated.load(Ordering::SeqCst) {
            return self.stream(index, resource, fallback, batch);
        }
        match self.stream(index, resource, primary, batch) {
            Err(RemoteError::Aborted) => Err(RemoteError::Aborted),
            Err(e) => {
                info!(
                    "{} via {} failed ({e}), switching batch to {}",
                    resource.path(),
                    primary.name(),
                    fallback.name()
                );
                batch.delegated.store(true, Ordering::SeqCst);
                self.stream(index, resource, fallback, batch)
            }
            ok => ok,
        }
    }

    fn stream(
        &self,
        index: usize,
        resource: &Resource,
        transport: &dyn Transport,
        batch: &Batch<'_>,
    ) -> Result<u64, RemoteError> {
        let policy = transport.slow_transfer_policy();
        let mut transfer = transport.open(resource)?;
        if let Some(length) = transfer.length {
            batch.tracker.revise_total(index, length);
        }

        let staging = resource.local_new();
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&staging)?);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;
        let started = Instant::now();

        loop {
            if self.abort.is_aborted() {
                return Err(RemoteError::Aborted);
            }
            let n = transfer.reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            received += n as u64;
            batch.tracker.update(index, received);
            check_speed(policy, started, received, resource)?;
        }
        out.flush()?;
        Ok(received)
    }
}

fn check_speed(
    policy: Option<SlowTransferPolicy>,
    started: Instant,
    received: u64,
    resource: &Resource,
) -> Result<(), RemoteError> {
    let Some(policy) = policy else {
        return Ok(());
    };
    let elapsed = started.elapsed();
    if elapsed > policy.grace && received < policy.min_bytes {
        return Err(RemoteError::SlowTransfer {
            path: resource.path().to_owned(),
            bytes: received,
            secs: elapsed.as_secs(),
        });
    }
    Ok(())
}
