//! CLI subprocess integration tests.
//!
//! These tests invoke the `hoist` binary as a subprocess and check exit
//! codes, stdout content, and JSON output.

use hoist_server::TestServer;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Output};
use zip::write::SimpleFileOptions;

/// `HOME` points at a scratch directory so no user downloader config leaks in.
fn hoist_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hoist"));
    cmd.env("HOME", home).env_remove("HOIST_LOG");
    cmd
}

fn hoist(home: &Path, app: &Path, args: &[&str]) -> Output {
    hoist_bin(home)
        .arg("--app")
        .arg(app)
        .args(args)
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn write_jar(path: &Path, payload: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut zw = zip::ZipWriter::new(File::create(path).unwrap());
    zw.start_file("payload", SimpleFileOptions::default()).unwrap();
    zw.write_all(payload).unwrap();
    zw.finish().unwrap();
}

fn jar_payload(path: &Path) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut out = Vec::new();
    archive
        .by_name("payload")
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    out
}

fn write_descriptor(dir: &Path, appbase: &str, version: Option<u64>) {
    let version = version.map(|v| format!("version = {v}\n")).unwrap_or_default();
    fs::write(
        dir.join("app.toml"),
        format!(
            r#"descriptor_version = 1
appbase = "{appbase}"
{version}code = ["lib/app.jar"]
resources = ["data/readme.txt"]

[cache]
use_code_cache = true
"#
        ),
    )
    .unwrap();
}

/// A published directory holding both resources and its descriptor.
fn publish_dir(dir: &Path, app: &[u8], readme: &[u8]) {
    fs::create_dir_all(dir.join("data")).unwrap();
    write_jar(&dir.join("lib/app.jar"), app);
    fs::write(dir.join("data/readme.txt"), readme).unwrap();
    write_descriptor(dir, "http://example.invalid/app", None);
}

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = hoist_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hoist"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = hoist_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["digest", "diff", "patch", "update", "verify", "gc", "cache"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn digest_then_verify_passes() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    publish_dir(dir.path(), b"app", b"readme");

    let output = hoist(home.path(), dir.path(), &["digest", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["digest_version"], 2);
    assert_eq!(json["manifests"][0]["manifest"], "digest2.txt");
    assert_eq!(json["manifests"][0]["resources"], 2);
    assert!(json["public_key"].is_null());
    assert!(dir.path().join("digest2.txt").exists());

    let output = hoist(home.path(), dir.path(), &["verify", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["valid"], true);
}

#[test]
fn verify_reports_tampered_resource() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    publish_dir(dir.path(), b"app", b"readme");
    assert!(hoist(home.path(), dir.path(), &["digest"]).status.success());

    fs::write(dir.path().join("data/readme.txt"), b"edited").unwrap();
    let output = hoist(home.path(), dir.path(), &["verify", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["valid"], false);
    assert_eq!(json["failed"], serde_json::json!(["data/readme.txt"]));
}

#[test]
fn verify_without_manifest_is_a_manifest_error() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    publish_dir(dir.path(), b"app", b"readme");
    let output = hoist(home.path(), dir.path(), &["verify"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_descriptor_is_a_manifest_error() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let output = hoist(home.path(), dir.path(), &["digest"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read descriptor"), "{stderr}");
}

#[test]
fn digest_signs_with_key_file() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    publish_dir(dir.path(), b"app", b"readme");
    let key = home.path().join("signing.key");
    fs::write(&key, "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=\n").unwrap();

    let output = hoist_bin(home.path())
        .arg("--app")
        .arg(dir.path())
        .args(["digest", "--json", "--sign-key"])
        .arg(&key)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["manifests"][0]["signed"], true);
    assert!(json["public_key"].as_str().is_some_and(|k| !k.is_empty()));
    assert!(dir.path().join("digest2.txt.sig").exists());
}

#[test]
fn diff_and_patch_upgrade_a_copy() {
    let home = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let v1 = root.path().join("1");
    let v2 = root.path().join("2");
    publish_dir(&v1, b"app v1", b"readme");
    publish_dir(&v2, b"app v2", b"readme");
    assert!(hoist(home.path(), &v2, &["digest"]).status.success());

    let output = hoist(home.path(), &v2, &["diff", "--json", "--from", "1"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json[0]["patch"], "patch1.dat");
    assert_eq!(json[0]["patched"], serde_json::json!(["lib/app.jar"]));
    assert!(v2.join("patch1.dat").exists());

    let install = root.path().join("install");
    publish_dir(&install, b"app v1", b"readme");
    let patch = v2.join("patch1.dat");
    let output = hoist(
        home.path(),
        &install,
        &["patch", "--json", patch.to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(jar_payload(&install.join("lib/app.jar")), b"app v2");

    fs::copy(v2.join("digest2.txt"), install.join("digest2.txt")).unwrap();
    assert_eq!(hoist(home.path(), &install, &["verify"]).status.code(), Some(0));
}

#[test]
fn update_fetches_then_gc_clears_cache() {
    let home = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let published = root.path().join("3");
    publish_dir(&published, b"app v3", b"readme v3");
    assert!(hoist(home.path(), &published, &["digest"]).status.success());

    let server = TestServer::start(root.path().to_path_buf());
    let app = tempfile::tempdir().unwrap();
    write_descriptor(app.path(), &format!("{}/%VERSION%", server.url), Some(3));

    let output = hoist(home.path(), app.path(), &["update", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["version"], 3);
    assert_eq!(json["fetched"].as_array().unwrap().len(), 2);
    assert_eq!(
        fs::read_to_string(app.path().join("version.txt")).unwrap().trim(),
        "3"
    );
    assert_eq!(jar_payload(&app.path().join("lib/app.jar")), b"app v3");

    let output = hoist(home.path(), app.path(), &["cache", "--json"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output).as_array().unwrap().len(), 1);

    let output = hoist(home.path(), app.path(), &["gc", "--json", "--retention-days", "0"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["code"]["expired"].as_array().unwrap().len(), 1);

    let output = hoist(home.path(), app.path(), &["cache", "--json"]);
    assert!(stdout_json(&output).as_array().unwrap().is_empty());

    let output = hoist(home.path(), app.path(), &["verify"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn completions_bash_mentions_binary() {
    let home = tempfile::tempdir().unwrap();
    let output = hoist_bin(home.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("hoist"));
}
