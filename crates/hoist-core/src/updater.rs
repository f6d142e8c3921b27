use crate::concurrency::{UpdateLock, LOCK_FILE};
use crate::launch::{LaunchPlan, Launcher};
use crate::lifecycle::{validate_transition, UpdateState, MAX_UPDATE_LOOPS};
use crate::observer::{DownloadRelay, StatusObserver};
use crate::CoreError;
use chrono::{DateTime, Utc};
use hoist_patch::{apply_patch_file, patch_file_name};
use hoist_remote::{
    AbortHandle, DownloadOutcome, Downloader, DownloaderConfig, FailedResource, RemoteError,
    Transport,
};
use hoist_schema::{
    encode_path, parse_descriptor_file, signature_path, verify_manifest_signature, AppDescriptor,
    AuxName, DigestVersion, Manifest, Resource, ResourceKind, SchemaError, DESCRIPTOR_FILE,
};
use hoist_store::{CacheLayout, CacheSession, NativeCache, ResourceCache, Retention};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Installed version marker inside an application directory.
pub const VERSION_FILE: &str = "version.txt";

/// Downloads of the manifest set before giving up on a version.
const MANIFEST_FETCH_ATTEMPTS: usize = 2;

/// Outcome of a successful [`Updater::update`].
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub previous_version: Option<u64>,
    pub version: Option<u64>,
    /// Patch files that applied cleanly.
    pub patched: Vec<String>,
    /// Resources downloaded and installed directly.
    pub fetched: Vec<String>,
    pub fetch_rounds: usize,
    pub plan: LaunchPlan,
    pub finished_at: DateTime<Utc>,
}

/// One manifest together with the resources it covers.
struct ResourceSet {
    group: Option<AuxName>,
    manifest: Manifest,
    resources: Vec<Resource>,
}

impl ResourceSet {
    fn label(&self) -> &str {
        self.group.as_deref().unwrap_or("primary")
    }
}

/// Brings an application directory up to the version its descriptor names.
///
/// The update runs as a small state machine (see [`UpdateState`]): local
/// metadata is checked first, an outdated install is patched when the
/// appbase publishes a patch for it, then every resource is verified and
/// anything still wrong is downloaded whole until the directory validates.
pub struct Updater {
    app_dir: PathBuf,
    descriptor: AppDescriptor,
    digest_version: DigestVersion,
    downloader: Downloader,
    concurrency: usize,
}

impl Updater {
    pub fn new(
        app_dir: impl Into<PathBuf>,
        descriptor: AppDescriptor,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        descriptor.validate()?;
        let digest_version = descriptor.digest_version()?;
        let concurrency = descriptor.max_concurrent_downloads.max(1);
        Ok(Self {
            app_dir: app_dir.into(),
            descriptor,
            digest_version,
            downloader: Downloader::new(transport),
            concurrency,
        })
    }

    /// Read `app.toml` from `app_dir` and build the transport from `config`.
    pub fn open(app_dir: impl Into<PathBuf>, config: &DownloaderConfig) -> Result<Self, CoreError> {
        let app_dir = app_dir.into();
        let descriptor = parse_descriptor_file(app_dir.join(DESCRIPTOR_FILE))?;
        let transport = config.build_transport()?;
        let limit = descriptor.max_concurrent_downloads;
        Ok(Self::new(app_dir, descriptor, transport)?
            .with_update_interval(config.update_interval())
            .with_concurrency(config.concurrency.min(limit)))
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.downloader = self.downloader.with_update_interval(interval);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.downloader.abort_handle()
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn descriptor(&self) -> &AppDescriptor {
        &self.descriptor
    }

    /// Version recorded in `version.txt`, if any.
    pub fn installed_version(&self) -> Option<u64> {
        let raw = fs::read_to_string(self.app_dir.join(VERSION_FILE)).ok()?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("ignoring unreadable {VERSION_FILE}: {e}");
                None
            }
        }
    }

    /// Check the installed resources against the local manifests without
    /// touching the network. Returns the resources that fail.
    pub fn verify(&self) -> Result<Vec<Resource>, CoreError> {
        let sets = self.load_sets(self.descriptor.version)?;
        Ok(verify_sets(&sets))
    }

    /// Update, then hand the resulting plan to `launcher`.
    pub fn run(
        &self,
        observer: &dyn StatusObserver,
        launcher: &dyn Launcher,
    ) -> Result<UpdateReport, CoreError> {
        let report = self.update(observer)?;
        launcher.launch(&report.plan)?;
        Ok(report)
    }

    pub fn update(&self, observer: &dyn StatusObserver) -> Result<UpdateReport, CoreError> {
        fs::create_dir_all(&self.app_dir)?;
        let _lock = UpdateLock::acquire(&self.app_dir.join(LOCK_FILE))?;

        let target = self.descriptor.version;
        let previous = self.installed_version();
        info!(
            "updating {} (installed {previous:?}, target {target:?})",
            self.app_dir.display()
        );

        let mut report = UpdateReport {
            previous_version: previous,
            version: target,
            patched: Vec::new(),
            fetched: Vec::new(),
            fetch_rounds: 0,
            plan: LaunchPlan::default(),
            finished_at: Utc::now(),
        };
        let mut sets = Vec::new();
        let mut patches = Vec::new();
        let mut failed = Vec::new();
        let mut state = UpdateState::VerifyMetadata;
        observer.state_changed(state);

        loop {
            let next = match state {
                UpdateState::VerifyMetadata if target.is_none() => {
                    let fetched = match self.fetch_manifests(None, observer) {
                        Err(CoreError::Aborted) => return Err(CoreError::Aborted),
                        other => other,
                    };
                    sets = match (self.load_sets(None), fetched) {
                        (Ok(loaded), Ok(())) => loaded,
                        (Ok(loaded), Err(e)) => {
                            warn!("keeping local manifests: {e}");
                            loaded
                        }
                        (Err(_), Err(e)) => return Err(e),
                        (Err(e), Ok(())) => {
                            return Err(CoreError::ManifestUnavailable(e.to_string()))
                        }
                    };
                    UpdateState::VerifyResources
                }
                UpdateState::VerifyMetadata => {
                    let outdated = target.is_some() && previous != target;
                    match self.load_sets(target) {
                        Ok(loaded) if outdated => {
                            sets = loaded;
                            if previous.is_some() {
                                UpdateState::FetchPatch
                            } else {
                                UpdateState::UpdateMetadata
                            }
                        }
                        Err(e) if outdated => {
                            warn!("local manifests unusable, not patching: {e}");
                            UpdateState::UpdateMetadata
                        }
                        Ok(loaded) => {
                            sets = loaded;
                            UpdateState::VerifyResources
                        }
                        Err(e) => {
                            warn!("local manifests unusable, fetching again: {e}");
                            self.fetch_manifests(target, observer)?;
                            sets = self
                                .load_sets(target)
                                .map_err(|e| CoreError::ManifestUnavailable(e.to_string()))?;
                            UpdateState::VerifyResources
                        }
                    }
                }
                UpdateState::FetchPatch => {
                    if let Some(old) = previous {
                        patches = self.fetch_patches(old, target, observer)?;
                    }
                    if patches.is_empty() {
                        UpdateState::UpdateMetadata
                    } else {
                        UpdateState::ApplyPatch
                    }
                }
                UpdateState::ApplyPatch => {
                    for patch in patches.drain(..) {
                        if let Some(name) = self.apply_patch(&patch, observer) {
                            report.patched.push(name);
                        }
                    }
                    UpdateState::UpdateMetadata
                }
                UpdateState::UpdateMetadata => {
                    self.fetch_manifests(target, observer)?;
                    sets = self
                        .load_sets(target)
                        .map_err(|e| CoreError::ManifestUnavailable(e.to_string()))?;
                    if let Some(version) = target {
                        self.write_installed_version(version)?;
                    }
                    UpdateState::VerifyResources
                }
                UpdateState::VerifyResources => {
                    failed = verify_sets(&sets);
                    if failed.is_empty() {
                        self.unpack_pending(&sets);
                        UpdateState::Launch
                    } else if report.fetch_rounds >= MAX_UPDATE_LOOPS {
                        return Err(CoreError::RetriesExhausted {
                            attempts: report.fetch_rounds,
                            failed: failed.iter().map(|r| r.path().to_owned()).collect(),
                        });
                    } else {
                        info!("{} resources need fetching", failed.len());
                        report.fetch_rounds += 1;
                        UpdateState::FetchResources
                    }
                }
                UpdateState::FetchResources => {
                    let installed = self.fetch_resources(&failed, &sets, observer)?;
                    report.fetched.extend(installed);
                    UpdateState::VerifyResources
                }
                UpdateState::Launch => break,
            };
            validate_transition(state, next)?;
            debug!("{state} -> {next}");
            state = next;
            observer.state_changed(state);
        }

        report.plan = self.launch_plan(&sets);
        report.finished_at = Utc::now();
        info!(
            "{} is current ({} patched, {} fetched)",
            self.app_dir.display(),
            report.patched.len(),
            report.fetched.len()
        );
        Ok(report)
    }

    fn active_groups(&self, version: Option<u64>) -> impl Iterator<Item = hoist_schema::AuxGroup> {
        self.descriptor
            .aux_groups(&self.app_dir, version)
            .into_iter()
            .filter(|g| g.active)
    }

    fn manifest_names(&self) -> Vec<String> {
        let mut names = vec![self.digest_version.manifest_name(None)];
        for group in self.active_groups(None) {
            names.push(self.digest_version.manifest_name(Some(&group.name)));
        }
        names
    }

    /// Read and check one local manifest, verifying its signature when the
    /// descriptor trusts any keys.
    fn load_manifest(&self, group: Option<&str>) -> Result<Manifest, SchemaError> {
        let name = self.digest_version.manifest_name(group);
        let path = self.app_dir.join(&name);
        self.read_manifest(&name, &path, &signature_path(&path))
    }

    fn read_manifest(&self, name: &str, path: &Path, sig: &Path) -> Result<Manifest, SchemaError> {
        let raw = fs::read(path)?;
        if !self.descriptor.trusted_keys.is_empty() {
            let signature = fs::read_to_string(sig)?;
            verify_manifest_signature(&raw, &signature, &self.descriptor.trusted_keys)?;
        }
        Manifest::parse(&raw, name, self.digest_version)
    }

    fn load_sets(&self, version: Option<u64>) -> Result<Vec<ResourceSet>, SchemaError> {
        let mut sets = vec![ResourceSet {
            group: None,
            manifest: self.load_manifest(None)?,
            resources: self.descriptor.resource_list(&self.app_dir, version),
        }];
        for group in self.active_groups(version) {
            sets.push(ResourceSet {
                manifest: self.load_manifest(Some(&group.name))?,
                group: Some(group.name),
                resources: group.resources,
            });
        }
        Ok(sets)
    }

    /// Download metadata files from the appbase of `version` into their
    /// `_new` staging paths. Nothing is moved into place.
    fn download_staged(
        &self,
        version: Option<u64>,
        names: &[String],
        observer: &dyn StatusObserver,
    ) -> Result<(Vec<Resource>, Vec<FailedResource>), CoreError> {
        let appbase = self.descriptor.appbase_for(version);
        let resources: Vec<Resource> = names
            .iter()
            .map(|name| {
                Resource::new(
                    name.as_str(),
                    format!("{appbase}/{}", encode_path(name)),
                    self.app_dir.join(name),
                    ResourceKind::Data,
                )
            })
            .collect();

        let report = self
            .downloader
            .download(&resources, self.concurrency, &DownloadRelay(observer));
        if report.outcome == DownloadOutcome::Aborted {
            discard_staged(&report.completed);
            return Err(CoreError::Aborted);
        }
        Ok((report.completed, report.failed))
    }

    /// Fetch every manifest (and signature, when keys are trusted) and move
    /// them into place only once all of them check out. A bad download is
    /// retried; the local manifests are left alone when every attempt fails.
    fn fetch_manifests(
        &self,
        version: Option<u64>,
        observer: &dyn StatusObserver,
    ) -> Result<(), CoreError> {
        let mut names = self.manifest_names();
        if !self.descriptor.trusted_keys.is_empty() {
            let sigs: Vec<String> = names.iter().map(|n| format!("{n}.sig")).collect();
            names.extend(sigs);
        }

        let mut last_error = String::new();
        for attempt in 1..=MANIFEST_FETCH_ATTEMPTS {
            info!("fetching {} metadata files (attempt {attempt})", names.len());
            let (staged, failed) = self.download_staged(version, &names, observer)?;
            let checked = match failed.first() {
                Some(f) => Err(format!("{}: {}", f.resource.path(), f.error)),
                None => self.check_staged_manifests(&staged),
            };
            match checked {
                Ok(()) => {
                    for resource in &staged {
                        fs::rename(resource.local_new(), resource.local())?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!("metadata fetch attempt {attempt} failed: {e}");
                    discard_staged(&staged);
                    last_error = e;
                }
            }
        }
        Err(CoreError::ManifestUnavailable(last_error))
    }

    fn check_staged_manifests(&self, staged: &[Resource]) -> Result<(), String> {
        let staged_path = |name: &str| {
            staged
                .iter()
                .find(|r| r.path() == name)
                .map(Resource::local_new)
        };
        for name in self.manifest_names() {
            let path = staged_path(&name).ok_or_else(|| format!("{name}: not downloaded"))?;
            let sig = staged_path(&format!("{name}.sig")).unwrap_or_else(|| signature_path(&path));
            self.read_manifest(&name, &path, &sig)
                .map_err(|e| format!("{name}: {e}"))?;
        }
        Ok(())
    }

    /// Fetch the patches from `old` to `target` that the appbase publishes.
    /// A missing patch is not an error; the resources are fetched instead.
    fn fetch_patches(
        &self,
        old: u64,
        target: Option<u64>,
        observer: &dyn StatusObserver,
    ) -> Result<Vec<PathBuf>, CoreError> {
        let mut names = vec![patch_file_name(old, None)];
        for group in self.active_groups(target) {
            names.push(patch_file_name(old, Some(&group.name)));
        }
        let (staged, failed) = self.download_staged(target, &names, observer)?;
        let mut fetched = Vec::new();
        for resource in &staged {
            fs::rename(resource.local_new(), resource.local())?;
            fetched.push(resource.local().to_path_buf());
        }
        for f in failed {
            match f.error {
                RemoteError::NotFound(_) => info!("no {} published", f.resource.path()),
                e => warn!("could not fetch {}: {e}", f.resource.path()),
            }
        }
        Ok(fetched)
    }

    /// Apply one patch file; failures leave the damage to resource
    /// verification. The patch file is removed either way.
    fn apply_patch(&self, patch: &Path, observer: &dyn StatusObserver) -> Option<String> {
        let name = patch
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let progress = |percent: u8| observer.patch_progress(percent);
        let result = apply_patch_file(&self.app_dir, patch, &progress);
        if let Err(e) = fs::remove_file(patch) {
            warn!("failed to remove {}: {e}", patch.display());
        }
        match result {
            Ok(summary) => {
                info!(
                    "applied {name}: {} created, {} patched, {} deleted",
                    summary.created.len(),
                    summary.patched.len(),
                    summary.deleted.len()
                );
                Some(name)
            }
            Err(e) => {
                warn!("{name} did not apply, falling back to full downloads: {e}");
                None
            }
        }
    }

    fn write_installed_version(&self, version: u64) -> Result<(), CoreError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.app_dir)?;
        writeln!(tmp, "{version}")?;
        tmp.persist(self.app_dir.join(VERSION_FILE))
            .map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }

    /// Download `resources` whole and move every copy that validates into
    /// place. Returns the installed paths.
    fn fetch_resources(
        &self,
        resources: &[Resource],
        sets: &[ResourceSet],
        observer: &dyn StatusObserver,
    ) -> Result<Vec<String>, CoreError> {
        let report = self
            .downloader
            .download(resources, self.concurrency, &DownloadRelay(observer));
        if report.outcome == DownloadOutcome::Aborted {
            return Err(CoreError::Aborted);
        }

        let mut installed = Vec::new();
        for resource in &report.completed {
            let staged = resource.local_new();
            let Some(set) = sets.iter().find(|s| s.resources.contains(resource)) else {
                let _ = fs::remove_file(&staged);
                continue;
            };
            if !set.manifest.validate_file(resource, &staged) {
                warn!(
                    "downloaded {} does not match the {} manifest",
                    resource.path(),
                    set.label()
                );
                let _ = fs::remove_file(&staged);
                continue;
            }
            fs::rename(&staged, resource.local())?;
            if resource.unpack() {
                let _ = fs::remove_file(resource.unpacked_marker());
                if let Err(e) = unpack(resource) {
                    warn!("failed to unpack {}: {e}", resource.path());
                }
            }
            installed.push(resource.path().to_owned());
        }
        Ok(installed)
    }

    /// Unpack valid resources that were never unpacked, e.g. after a patch.
    fn unpack_pending(&self, sets: &[ResourceSet]) {
        for resource in sets.iter().flat_map(|s| &s.resources) {
            if resource.unpack() && !resource.unpacked_marker().exists() {
                if let Err(e) = unpack(resource) {
                    warn!("failed to unpack {}: {e}", resource.path());
                }
            }
        }
    }

    /// Classpath and native directories for launching, populated through the
    /// caches. Cache failures fall back to the installed files.
    fn launch_plan(&self, sets: &[ResourceSet]) -> LaunchPlan {
        let retention = Retention::days(self.descriptor.cache.retention_days);
        let code_layout = CacheLayout::code(&self.app_dir);
        let code_cache = ResourceCache::new(code_layout.clone());
        let native_cache = NativeCache::for_app(&self.app_dir);

        let code_session = self.descriptor.cache.use_code_cache.then(|| {
            let (session, report) = CacheSession::begin(&code_layout, retention);
            log_gc("code", report);
            session
        });
        let has_native = sets.iter().flat_map(|s| &s.resources).any(Resource::native);
        let native_session = has_native.then(|| {
            let (session, report) = CacheSession::begin(native_cache.layout(), retention);
            log_gc("native", report);
            session
        });

        let mut plan = LaunchPlan {
            program: self.descriptor.launch.program.clone(),
            args: self.descriptor.launch.args.clone(),
            working_dir: self.app_dir.clone(),
            ..LaunchPlan::default()
        };
        for set in sets {
            for resource in &set.resources {
                let hash = set.manifest.get(resource.path());
                if resource.native() {
                    match hash.map(|h| native_cache.materialize(resource, h)) {
                        Some(Ok(dir)) => plan.native_dirs.push(dir),
                        Some(Err(e)) => warn!("native cache failed for {}: {e}", resource.path()),
                        None => warn!("{} has no digest, not loading it", resource.path()),
                    }
                } else if resource.kind() == ResourceKind::Code {
                    let cached = match (code_session.is_some(), hash) {
                        (true, Some(h)) => code_cache
                            .cache_file(resource.local(), h, &resource.extension())
                            .map_err(|e| warn!("code cache failed for {}: {e}", resource.path()))
                            .ok(),
                        _ => None,
                    };
                    plan.classpath
                        .push(cached.unwrap_or_else(|| resource.local().to_path_buf()));
                }
            }
        }

        if let Some(session) = code_session {
            log_gc("code", session.finish());
        }
        if let Some(session) = native_session {
            log_gc("native", session.finish());
        }
        plan
    }
}

fn verify_sets(sets: &[ResourceSet]) -> Vec<Resource> {
    sets.iter()
        .flat_map(|set| set.manifest.verify_resources(&set.resources))
        .collect()
}

/// Extract an archive resource next to itself and mark it unpacked.
fn discard_staged(staged: &[Resource]) {
    for resource in staged {
        if let Err(e) = fs::remove_file(resource.local_new()) {
            debug!("failed to remove {}: {e}", resource.local_new().display());
        }
    }
}

fn unpack(resource: &Resource) -> Result<(), CoreError> {
    let dir = resource.local().parent().unwrap_or(Path::new("."));
    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(resource.local())?))?;
    archive.extract(dir)?;
    fs::write(resource.unpacked_marker(), b"")?;
    info!("unpacked {} into {}", resource.path(), dir.display());
    Ok(())
}

fn log_gc(cache: &str, report: Option<hoist_store::GcReport>) {
    if let Some(report) = report {
        if report.removed() > 0 {
            info!("{cache} cache: removed {} entries", report.removed());
        } else {
            debug!("{cache} cache: nothing to collect");
        }
    }
}
