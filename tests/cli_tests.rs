mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

use common::{get_mirrorfs_path, read_to_string, TestConfigContext};

fn mirrorfs(ctx: &TestConfigContext) -> Command {
    let mut cmd = Command::new(get_mirrorfs_path());
    cmd.env("MIRRORFS_CONFIG_DIR", &ctx.config_dir)
        .env("MIRRORFS_LOG", "warn");
    cmd
}

#[test]
fn test_config_path_points_at_config_dir() {
    let ctx = TestConfigContext::new();
    mirrorfs(&ctx)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            ctx.config_dir.to_string_lossy().to_string(),
        ));
}

#[test]
fn test_config_show_lists_profiles() {
    let ctx = TestConfigContext::new();
    mirrorfs(&ctx)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lpar1:"))
        .stdout(predicate::str::contains("delay_ms: 5"));
}

#[test]
fn test_ls_root_shows_profiles() {
    let ctx = TestConfigContext::new();
    mirrorfs(&ctx)
        .args(["ls", "/"])
        .assert()
        .success()
        .stdout(predicate::eq("lpar1/\n"));
}

#[test]
fn test_ls_and_cat() {
    let ctx = TestConfigContext::new();
    ctx.write_store_file("u/a.txt", "hello from the store\n");
    fs::create_dir_all(ctx.store_path("u/sub")).unwrap();

    mirrorfs(&ctx)
        .args(["ls", "/lpar1/u"])
        .assert()
        .success()
        .stdout(predicate::eq("a.txt\nsub/\n"));

    mirrorfs(&ctx)
        .args(["cat", "/lpar1/u/a.txt"])
        .assert()
        .success()
        .stdout(predicate::eq("hello from the store\n"));
}

#[test]
fn test_stat_json() {
    let ctx = TestConfigContext::new();
    ctx.write_store_file("u/a.txt", "12345");

    let output = mirrorfs(&ctx)
        .args(["stat", "--json", "/lpar1/u/a.txt"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stat: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stat["kind"], "file");
    assert_eq!(stat["size"], 5);
    assert_eq!(stat["permissions"], "readwrite");
}

#[test]
fn test_put_creates_and_updates() {
    let ctx = TestConfigContext::new();
    fs::create_dir_all(ctx.store_path("u")).unwrap();
    let source = ctx.temp_dir.path().join("upload.txt");
    fs::write(&source, "uploaded").unwrap();

    mirrorfs(&ctx)
        .args(["put", "/lpar1/u/new.txt"])
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved /lpar1/u/new.txt"));
    assert_eq!(read_to_string(&ctx.store_path("u/new.txt")), "uploaded");

    fs::write(&source, "second").unwrap();
    mirrorfs(&ctx)
        .args(["put", "/lpar1/u/new.txt"])
        .arg(&source)
        .assert()
        .success();
    assert_eq!(read_to_string(&ctx.store_path("u/new.txt")), "second");
}

#[test]
fn test_mkdir_mv_cp_rm() {
    let ctx = TestConfigContext::new();
    ctx.write_store_file("u/a.txt", "a");

    mirrorfs(&ctx)
        .args(["mkdir", "/lpar1/u/dir"])
        .assert()
        .success();
    assert!(ctx.store_path("u/dir").is_dir());

    mirrorfs(&ctx)
        .args(["mv", "/lpar1/u/a.txt", "/lpar1/u/b.txt"])
        .assert()
        .success();
    assert!(ctx.store_path("u/b.txt").exists());
    assert!(!ctx.store_path("u/a.txt").exists());

    mirrorfs(&ctx)
        .args(["cp", "/lpar1/u/b.txt", "/lpar1/u"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/lpar1/u/b (1).txt"));
    assert_eq!(read_to_string(&ctx.store_path("u/b (1).txt")), "a");

    mirrorfs(&ctx)
        .args(["rm", "/lpar1/u/b.txt"])
        .assert()
        .success();
    assert!(!ctx.store_path("u/b.txt").exists());
}

#[test]
fn test_missing_file_fails() {
    let ctx = TestConfigContext::new();
    fs::create_dir_all(ctx.store_path("u")).unwrap();

    mirrorfs(&ctx)
        .args(["cat", "/lpar1/u/missing.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));
}

#[test]
fn test_relative_path_rejected() {
    let ctx = TestConfigContext::new();
    mirrorfs(&ctx)
        .args(["ls", "lpar1/u"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be absolute"));
}

#[test]
fn test_shell_session_keeps_cache() {
    let ctx = TestConfigContext::new();
    ctx.write_store_file("u/a.txt", "first");

    mirrorfs(&ctx)
        .arg("shell")
        .write_stdin("cat /lpar1/u/a.txt\nls /lpar1/u\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("a.txt"));
}
