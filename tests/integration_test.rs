use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::tempdir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

fn create_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options: FileOptions<()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn checksums_json(server_url: &str) -> String {
    serde_json::json!({
        format!("{server_url}/build-tools_r30.0.2-linux.zip"): [
            {"sha256": "aa", "source.properties": "Pkg.Revision=30.0.2"}
        ],
        format!("{server_url}/build-tools_r30.0.3-linux.zip"): [
            {"sha256": "bb", "source.properties": "Pkg.Revision=30.0.3"}
        ],
        format!("{server_url}/platform-tools_r33.0.3-linux.zip"): [
            {"sha256": "cc", "source.properties": "Pkg.Revision=33.0.3\nPkg.Path=platform-tools"}
        ],
    })
    .to_string()
}

fn sdkmgr() -> Command {
    let mut cmd = Command::cargo_bin("sdkmgr").unwrap();
    cmd.env_remove("ANDROID_HOME")
        .env_remove("SDKMGR_CACHE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_list_shows_available_packages_and_aliases() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();

    let dir = tempdir().unwrap();

    sdkmgr()
        .arg("list")
        .arg("--sdk-root")
        .arg(dir.path().join("sdk"))
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .success()
        .stdout(predicate::str::contains("build-tools;30.0.2"))
        .stdout(predicate::str::contains("build-tools;30.0.3"))
        // the bare alias tracks the highest concrete revision
        .stdout(predicate::str::contains("platform-tools;33.0.3"))
        .stdout(predicate::str::contains("Available Packages:"));
}

#[test]
fn test_end_to_end_install() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();
    let _zip = server
        .mock("GET", "/platform-tools_r33.0.3-linux.zip")
        .with_status(200)
        .with_body(create_zip(&[
            ("platform-tools/adb", "adb binary"),
            ("platform-tools/fastboot", "fastboot binary"),
        ]))
        .create();

    let dir = tempdir().unwrap();
    let sdk_root = dir.path().join("sdk");
    let cache_dir = dir.path().join("cache");

    sdkmgr()
        .arg("install")
        .arg("platform-tools")
        .arg("--sdk-root")
        .arg(&sdk_root)
        .arg("--cache-dir")
        .arg(&cache_dir)
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .success();

    // wrapper folder collapsed: contents live directly in platform-tools/
    let install_dir = sdk_root.join("platform-tools");
    assert_eq!(
        std::fs::read_to_string(install_dir.join("adb")).unwrap(),
        "adb binary"
    );
    assert!(install_dir.join("package.xml").exists());
    // the cached archive is deleted after a successful install
    assert!(!cache_dir.join("platform-tools_r33.0.3-linux.zip").exists());
}

#[test]
fn test_install_is_idempotent() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();

    let dir = tempdir().unwrap();
    let sdk_root = dir.path().join("sdk");
    std::fs::create_dir_all(sdk_root.join("platform-tools")).unwrap();
    std::fs::write(sdk_root.join("platform-tools/marker"), "keep me").unwrap();

    // no mock for the artifact: an existing install must not re-download
    sdkmgr()
        .arg("install")
        .arg("platform-tools")
        .arg("--sdk-root")
        .arg(&sdk_root)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(sdk_root.join("platform-tools/marker")).unwrap(),
        "keep me"
    );
}

#[test]
fn test_unknown_package_prints_suggestion() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();

    let dir = tempdir().unwrap();

    sdkmgr()
        .arg("install")
        .arg("build-tool;30.0.3")
        .arg("--sdk-root")
        .arg(dir.path().join("sdk"))
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to find package"))
        .stderr(predicate::str::contains("Did you mean 'build-tools;30.0.3'?"));
}

#[test]
fn test_corrupt_archive_is_recoverable_and_cache_cleared() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();
    let _zip = server
        .mock("GET", "/build-tools_r30.0.3-linux.zip")
        .with_status(200)
        .with_body("this is not a zip file")
        .create();

    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");

    sdkmgr()
        .arg("install")
        .arg("build-tools;30.0.3")
        .arg("--sdk-root")
        .arg(dir.path().join("sdk"))
        .arg("--cache-dir")
        .arg(&cache_dir)
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt archive"));

    // the bad download was removed so the next run fetches a fresh copy
    assert!(!cache_dir.join("build-tools_r30.0.3-linux.zip").exists());
}

#[test]
fn test_uninstall_removes_directory() {
    let mut server = mockito::Server::new();
    let url = server.url();

    let _sig = server
        .mock("GET", "/checksums.json.asc")
        .with_status(200)
        .with_body("sig")
        .create();
    let _body = server
        .mock("GET", "/checksums.json")
        .with_status(200)
        .with_body(checksums_json(&url))
        .create();

    let dir = tempdir().unwrap();
    let sdk_root = dir.path().join("sdk");
    std::fs::create_dir_all(sdk_root.join("platform-tools")).unwrap();

    sdkmgr()
        .arg("uninstall")
        .arg("platform-tools")
        .arg("--sdk-root")
        .arg(&sdk_root)
        .arg("--cache-dir")
        .arg(dir.path().join("cache"))
        .arg("--checksums-url")
        .arg(format!("{}/checksums.json", url))
        .arg("--skip-verification")
        .assert()
        .success();

    assert!(!sdk_root.join("platform-tools").exists());
}
