//! Binary-level tests
//!
//! Tests verify:
//! - Argument validation happens before any network activity
//! - `load` summarises a saved directory in human and JSON form

use assert_cmd::Command;
use serde_json::Value;
use skypatrol_downloader::collection::{Collection, IndexTable, Measurement};
use skypatrol_downloader::identifier::Identifier;
use skypatrol_downloader::{DatasetCategory, StellarObservation};
use tempfile::TempDir;

fn observation(id: u64, jd: f64, mag: f64, camera: &str) -> StellarObservation {
    StellarObservation {
        asas_sn_id: id,
        jd,
        flux: 2.0,
        flux_err: 0.1,
        mag,
        mag_err: 0.02,
        limit: 17.0,
        fwhm: 1.5,
        quality: "G".to_string(),
        camera: camera.to_string(),
        image_id: format!("img-{id}-{jd}"),
    }
}

/// Saves a collection of three targets, one of them without data
fn saved_collection() -> TempDir {
    let dir = TempDir::new().unwrap();
    let ids: Vec<Identifier> = vec![101.into(), 202.into(), 303.into()];
    let rows = vec![
        observation(101, 2_458_001.5, 14.0, "ba"),
        observation(101, 2_458_002.5, 14.2, "ba"),
        observation(202, 2_458_001.5, 12.0, "bn"),
    ]
    .into_iter()
    .filter_map(Measurement::classify)
    .collect();
    let collection = Collection::new(
        DatasetCategory::Stellar,
        IndexTable::from_ids("asas_sn_id", ids),
        rows,
    );
    collection.save(dir.path(), true).unwrap();
    dir
}

#[test]
fn test_help_lists_commands() {
    let output = Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fetch"));
    assert!(stdout.contains("load"));
    assert!(stdout.contains("servers"));
}

#[test]
fn test_invalid_concurrency_rejected() {
    Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args(["fetch", "1", "--shard", "127.0.0.1:1", "--concurrency", "0"])
        .assert()
        .failure();

    Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args(["fetch", "1", "--shard", "127.0.0.1:1", "--concurrency", "64"])
        .assert()
        .failure();
}

#[test]
fn test_named_stellar_identifier_rejected() {
    let output = Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args(["fetch", "Vega", "--shard", "127.0.0.1:1"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_load_human_summary() {
    let dir = saved_collection();

    let output = Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args(["load", dir.path().to_str().unwrap(), "--stats"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Category: stellar"));
    assert!(stdout.contains("Targets: 3"));
    assert!(stdout.contains("Targets with data: 2"));
    assert!(stdout.contains("Rows: 3"));
    assert!(stdout.contains("101"));
}

#[test]
fn test_load_json_stats() {
    let dir = saved_collection();

    let output = Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args([
            "--output-format",
            "json",
            "load",
            dir.path().to_str().unwrap(),
            "--stats",
            "--filter",
            "V",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["targets"], 3);
    assert_eq!(summary["rows"], 3);

    // Only target 101 has V-band epochs
    let stats = summary["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["id"], 101);
    assert_eq!(stats[0]["epochs"], 2);
    assert!((stats[0]["mean_mag"].as_f64().unwrap() - 14.1).abs() < 1e-9);
}

#[test]
fn test_load_missing_directory_fails() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("skypatrol-downloader")
        .unwrap()
        .args(["load", dir.path().join("absent").to_str().unwrap()])
        .assert()
        .failure();
}
