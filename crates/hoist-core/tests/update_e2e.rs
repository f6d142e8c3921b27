//! Full update cycles against an in-process appbase server. No mocks.

use hoist_core::{CoreError, StatusObserver, UpdateState, Updater, LOCK_FILE, VERSION_FILE};
use hoist_patch::{create_patch, patch_file_name};
use hoist_remote::DownloaderConfig;
use hoist_schema::{
    is_archive, public_key_base64, sign_manifest, signature_path, signing_key_from_base64,
    DigestVersion, Manifest, Resource, ResourceKind,
};
use hoist_server::TestServer;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use zip::write::SimpleFileOptions;

const SIGNING_KEY: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<UpdateState>>,
    download: Mutex<Vec<u8>>,
}

impl StatusObserver for Recorder {
    fn state_changed(&self, state: UpdateState) {
        self.states.lock().unwrap().push(state);
    }

    fn download_progress(&self, percent: u8, _remaining: Option<Duration>) {
        self.download.lock().unwrap().push(percent);
    }
}

/// Archives get a single `payload` entry holding `data`.
fn write_file(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    if is_archive(&path.to_string_lossy()) {
        let mut zw = zip::ZipWriter::new(File::create(path).unwrap());
        zw.start_file("payload", SimpleFileOptions::default()).unwrap();
        zw.write_all(data).unwrap();
        zw.finish().unwrap();
    } else {
        fs::write(path, data).unwrap();
    }
}

fn read_payload(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    if is_archive(&path.to_string_lossy()) {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive
            .by_name("payload")
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
    } else {
        out = fs::read(path).unwrap();
    }
    out
}

fn local_resources(root: &Path, files: &[(&str, &[u8])]) -> Vec<Resource> {
    files
        .iter()
        .map(|(p, _)| {
            let kind = if p.ends_with(".jar") {
                ResourceKind::Code
            } else {
                ResourceKind::Data
            };
            Resource::local_only(*p, root, kind)
        })
        .collect()
}

/// Publish `files` as `<root>/<version>/` with a digest manifest.
fn publish(root: &Path, version: u64, files: &[(&str, &[u8])], group: Option<&str>) {
    publish_dir(&root.join(version.to_string()), files, group);
}

fn publish_dir(dir: &Path, files: &[(&str, &[u8])], group: Option<&str>) {
    for (path, data) in files {
        write_file(&dir.join(path), data);
    }
    Manifest::create(&local_resources(dir, files), DigestVersion::V2, group)
        .unwrap()
        .write_to(dir)
        .unwrap();
}

fn publish_patch(root: &Path, old: u64, new: u64, old_files: &[(&str, &[u8])], new_files: &[(&str, &[u8])]) {
    let old_dir = root.join(old.to_string());
    let new_dir = root.join(new.to_string());
    create_patch(
        &local_resources(&old_dir, old_files),
        &local_resources(&new_dir, new_files),
        DigestVersion::V2,
        &new_dir.join(patch_file_name(old, None)),
    )
    .unwrap();
}

const README_ONLY: &str = r#"resources = ["data/readme.txt"]"#;

/// `top` holds top-level keys beyond the common ones, `tables` extra tables.
fn write_descriptor(app: &Path, base: &str, version: u64, top: &str, tables: &str) {
    fs::create_dir_all(app).unwrap();
    let toml = format!(
        r#"descriptor_version = 1
appbase = "{base}/%VERSION%"
version = {version}
code = ["lib/app.jar"]
{top}

[launch]
program = "java"
args = ["-jar", "lib/app.jar"]

[cache]
use_code_cache = true
retention_days = 7

{tables}
"#
    );
    fs::write(app.join("app.toml"), toml).unwrap();
}

fn updater(app: &Path) -> Updater {
    let config = DownloaderConfig {
        update_interval_ms: 0,
        ..DownloaderConfig::default()
    };
    Updater::open(app, &config).unwrap()
}

const V1: &[(&str, &[u8])] = &[("lib/app.jar", b"app v1"), ("data/readme.txt", b"readme v1")];
const V2: &[(&str, &[u8])] = &[("lib/app.jar", b"app v2"), ("data/readme.txt", b"readme v1")];

#[test]
fn fresh_install_fetches_everything() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");

    let rec = Recorder::default();
    let report = updater(app.path()).update(&rec).unwrap();

    assert_eq!(report.previous_version, None);
    assert_eq!(report.version, Some(1));
    assert!(report.patched.is_empty());
    assert_eq!(report.fetched.len(), 2);
    assert_eq!(report.fetch_rounds, 1);
    assert_eq!(fs::read_to_string(app.path().join(VERSION_FILE)).unwrap(), "1\n");
    for (path, data) in V1 {
        assert_eq!(read_payload(&app.path().join(path)), *data);
        assert!(!app.path().join(format!("{path}_new")).exists());
    }
    assert!(app.path().join(LOCK_FILE).exists());

    use UpdateState::{FetchResources, Launch, UpdateMetadata, VerifyMetadata, VerifyResources};
    assert_eq!(
        *rec.states.lock().unwrap(),
        vec![
            VerifyMetadata,
            UpdateMetadata,
            VerifyResources,
            FetchResources,
            VerifyResources,
            Launch
        ]
    );
    assert_eq!(rec.download.lock().unwrap().last(), Some(&100));

    let plan = report.plan;
    assert_eq!(plan.program, "java");
    assert_eq!(plan.classpath.len(), 1);
    assert!(plan.classpath[0].starts_with(app.path().join(".cache")));
    assert_eq!(read_payload(&plan.classpath[0]), b"app v1");
}

#[test]
fn current_install_only_verifies() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    let before = server.requests().len();
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert!(report.fetched.is_empty());
    assert_eq!(report.fetch_rounds, 0);
    assert_eq!(server.requests().len(), before);
}

#[test]
fn published_patch_upgrades_without_full_downloads() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    publish(site.path(), 2, V2, None);
    publish_patch(site.path(), 1, 2, V1, V2);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    write_descriptor(app.path(), &server.url, 2, README_ONLY, "");
    let rec = Recorder::default();
    let report = updater(app.path()).update(&rec).unwrap();

    assert_eq!(report.previous_version, Some(1));
    assert_eq!(report.patched, vec!["patch1.dat"]);
    assert!(report.fetched.is_empty());
    assert_eq!(read_payload(&app.path().join("lib/app.jar")), b"app v2");
    assert_eq!(fs::read_to_string(app.path().join(VERSION_FILE)).unwrap(), "2\n");
    assert!(!app.path().join("patch1.dat").exists());
    assert!(!server.requests().iter().any(|r| r == "GET /2/lib/app.jar"));
    assert_eq!(rec.states.lock().unwrap()[1], UpdateState::FetchPatch);
    assert_eq!(rec.states.lock().unwrap()[2], UpdateState::ApplyPatch);
}

#[test]
fn missing_patch_falls_back_to_downloads() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    publish(site.path(), 2, V2, None);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    write_descriptor(app.path(), &server.url, 2, README_ONLY, "");
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert!(report.patched.is_empty());
    assert_eq!(report.fetched, vec!["lib/app.jar"]);
    assert_eq!(read_payload(&app.path().join("lib/app.jar")), b"app v2");
}

#[test]
fn damaged_resource_is_refetched() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    fs::write(app.path().join("data/readme.txt"), b"tampered").unwrap();
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert_eq!(report.fetched, vec!["data/readme.txt"]);
    assert_eq!(fs::read(app.path().join("data/readme.txt")).unwrap(), b"readme v1");
}

#[test]
fn corrupt_local_manifest_is_fetched_again() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    let manifest = app.path().join("digest2.txt");
    let text = fs::read_to_string(&manifest).unwrap();
    fs::write(&manifest, text.replacen("lib/app.jar", "lib/evil.jar", 1)).unwrap();

    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert!(report.fetched.is_empty());
    assert_eq!(
        fs::read(&manifest).unwrap(),
        fs::read(site.path().join("1/digest2.txt")).unwrap()
    );
}

#[test]
fn bad_published_manifest_keeps_installed_one() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    publish(site.path(), 2, V2, None);
    let published = site.path().join("2/digest2.txt");
    let text = fs::read_to_string(&published).unwrap();
    fs::write(&published, text.replacen("lib/app.jar", "lib/evil.jar", 1)).unwrap();
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");
    updater(app.path()).update(&Recorder::default()).unwrap();

    write_descriptor(app.path(), &server.url, 2, README_ONLY, "");
    let err = updater(app.path()).update(&Recorder::default()).unwrap_err();
    assert!(matches!(err, CoreError::ManifestUnavailable(_)), "{err}");

    let manifest_gets = server
        .requests()
        .iter()
        .filter(|r| *r == "GET /2/digest2.txt")
        .count();
    assert_eq!(manifest_gets, 2);
    assert_eq!(
        fs::read(app.path().join("digest2.txt")).unwrap(),
        fs::read(site.path().join("1/digest2.txt")).unwrap()
    );
    assert!(!app.path().join("digest2.txt_new").exists());
    assert_eq!(fs::read_to_string(app.path().join(VERSION_FILE)).unwrap(), "1\n");
    assert_eq!(read_payload(&app.path().join("lib/app.jar")), b"app v1");
}

#[test]
fn unversioned_app_picks_up_republished_files() {
    let site = tempfile::tempdir().unwrap();
    let live = site.path().join("live");
    publish_dir(&live, V1, None);
    let server = TestServer::start(site.path().to_path_buf());

    let app = tempfile::tempdir().unwrap();
    fs::write(
        app.path().join("app.toml"),
        format!(
            r#"descriptor_version = 1
appbase = "{}/live"
code = ["lib/app.jar"]
resources = ["data/readme.txt"]
"#,
            server.url
        ),
    )
    .unwrap();
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert_eq!(report.version, None);
    assert_eq!(report.fetched.len(), 2);
    assert!(!app.path().join(VERSION_FILE).exists());

    publish_dir(&live, V2, None);
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert_eq!(report.fetched, vec!["lib/app.jar"]);
    assert_eq!(read_payload(&app.path().join("lib/app.jar")), b"app v2");
    assert_eq!(
        fs::read(app.path().join("digest2.txt")).unwrap(),
        fs::read(live.join("digest2.txt")).unwrap()
    );
    let manifest_gets = server
        .requests()
        .iter()
        .filter(|r| *r == "GET /live/digest2.txt")
        .count();
    assert_eq!(manifest_gets, 2);
}

#[test]
fn unfixable_resource_exhausts_retries() {
    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    // The published file no longer matches the published manifest.
    fs::write(site.path().join("1/data/readme.txt"), b"drifted").unwrap();
    let server = TestServer::start(site.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &server.url, 1, README_ONLY, "");

    let err = updater(app.path()).update(&Recorder::default()).unwrap_err();
    match err {
        CoreError::RetriesExhausted { attempts, failed } => {
            assert_eq!(attempts, hoist_core::MAX_UPDATE_LOOPS);
            assert_eq!(failed, vec!["data/readme.txt"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!app.path().join("data/readme.txt_new").exists());
}

#[test]
fn signed_manifests_are_required_when_keys_are_trusted() {
    let key = signing_key_from_base64(SIGNING_KEY).unwrap();
    let trusted = format!("trusted_keys = [\"{}\"]", public_key_base64(&key));

    let site = tempfile::tempdir().unwrap();
    publish(site.path(), 1, V1, None);
    let server = TestServer::start(site.path().to_path_buf());

    let app = tempfile::tempdir().unwrap();
    let top = format!("{README_ONLY}\n{trusted}");
    write_descriptor(app.path(), &server.url, 1, &top, "");
    let err = updater(app.path()).update(&Recorder::default()).unwrap_err();
    assert!(matches!(err, CoreError::ManifestUnavailable(_)));

    let manifest = site.path().join("1/digest2.txt");
    let raw = fs::read(&manifest).unwrap();
    fs::write(signature_path(&manifest), sign_manifest(&raw, &key)).unwrap();
    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert_eq!(report.fetched.len(), 2);
    assert!(app.path().join("digest2.txt.sig").exists());
}

#[test]
fn unpack_resources_and_aux_groups() {
    let site = tempfile::tempdir().unwrap();
    let primary: &[(&str, &[u8])] = &[
        ("lib/app.jar", b"app v1"),
        ("data/readme.txt", b"readme v1"),
        ("data/levels.zip", b"level one"),
    ];
    publish(site.path(), 1, primary, None);
    let extras: &[(&str, &[u8])] = &[("extras/music.txt", b"la la la")];
    publish(site.path(), 1, extras, Some("extras"));
    let server = TestServer::start(site.path().to_path_buf());

    let app = tempfile::tempdir().unwrap();
    let top = r#"resources = ["data/readme.txt", "data/levels.zip"]
unpack = ["data/levels.zip"]"#;
    let tables = r#"[[aux]]
name = "extras"
resources = ["extras/music.txt"]"#;
    write_descriptor(app.path(), &server.url, 1, top, tables);

    let report = updater(app.path()).update(&Recorder::default()).unwrap();
    assert_eq!(report.fetched.len(), 4);
    assert_eq!(fs::read(app.path().join("data/payload")).unwrap(), b"level one");
    assert!(app.path().join("data/levels.zip.unpacked").exists());
    assert_eq!(fs::read(app.path().join("extras/music.txt")).unwrap(), b"la la la");
    assert!(app.path().join("digest2-extras.txt").exists());
}
