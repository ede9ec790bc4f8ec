use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_profile(dir: &Path, extra: &str) -> std::path::PathBuf {
    let config = dir.join("shrink.ini");
    fs::write(
        &config,
        format!(
            "[default]\nworkdir = {}\ndb_socket = {}\n{}",
            dir.display(),
            dir.join("mysqld.sock").display(),
            extra
        ),
    )
    .unwrap();
    config
}

#[test]
fn missing_config_file_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    Command::cargo_bin("ibdata-shrinker")?
        .arg("-c")
        .arg(dir.path().join("absent.ini"))
        .args(["-s", "1"])
        .env("RUST_LOG", "off")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent.ini"));
    Ok(())
}

#[test]
fn unknown_profile_is_a_config_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = write_profile(dir.path(), "");

    Command::cargo_bin("ibdata-shrinker")?
        .arg("-c")
        .arg(&config)
        .args(["-p", "staging", "-s", "2"])
        .env("RUST_LOG", "off")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("staging"));
    Ok(())
}

#[test]
fn missing_socket_is_rejected_before_connecting() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config = write_profile(dir.path(), "use_hardlink = yes\n");

    Command::cargo_bin("ibdata-shrinker")?
        .arg("-c")
        .arg(&config)
        .args(["-s", "1"])
        .env("RUST_LOG", "off")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("socket"));
    Ok(())
}

#[test]
fn stage_must_be_one_or_two() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    Command::cargo_bin("ibdata-shrinker")?
        .arg("-c")
        .arg(dir.path().join("x.ini"))
        .args(["-s", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("3"));
    Ok(())
}
