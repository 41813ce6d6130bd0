//! Saving light curves and loading them back
//!
//! Tests verify:
//! - Save-then-load reproduces the in-memory collection for any block size
//! - A target listed in several blocks ends up in a single file
//! - Designations with path separators get filesystem-safe file names
//! - Designations differing only in case or punctuation keep separate files

use crate::support::{backend, epochs_for, numeric_ids, ScriptedSource};
use skypatrol_downloader::collection::{load_collection, IndexEntry, IndexTable};
use skypatrol_downloader::identifier::Identifier;
use skypatrol_downloader::output::read_curve_file;
use skypatrol_downloader::retrieval::{RetrievalExecutor, RetrievalJob, RetrievalOutput};
use skypatrol_downloader::{DatasetCategory, SolarSystemObservation, StellarObservation};
use std::sync::Arc;
use tempfile::TempDir;

fn stellar_job(ids: Vec<Identifier>) -> RetrievalJob {
    let index = IndexTable::from_ids(DatasetCategory::Stellar.id_column(), ids.clone());
    RetrievalJob::new(DatasetCategory::Stellar, ids, index)
}

#[tokio::test]
async fn test_save_then_load_matches_memory_for_any_block_size() {
    let ids = numeric_ids(20);

    let in_memory = RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2))
        .retrieve::<StellarObservation>(stellar_job(ids.clone()))
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    for block_size in [1, 4, 100] {
        let dir = TempDir::new().unwrap();
        let executor = RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2))
            .with_block_size(block_size)
            .with_concurrency(3);

        let output = executor
            .retrieve::<StellarObservation>(stellar_job(ids.clone()).with_save_dir(dir.path()))
            .await
            .unwrap();
        let files = match output {
            RetrievalOutput::Files(files) => files,
            RetrievalOutput::Collection(_) => panic!("expected files in save mode"),
        };

        // index.json plus one file per target with data
        let with_data = (1..=20).filter(|n| epochs_for(*n) > 0).count();
        assert_eq!(files.len(), with_data + 1, "block size {block_size}");

        let loaded = load_collection::<StellarObservation>(dir.path()).unwrap();
        assert_eq!(loaded.index(), in_memory.index(), "block size {block_size}");
        assert_eq!(loaded.rows(), in_memory.rows(), "block size {block_size}");
        assert_eq!(loaded.category(), DatasetCategory::Stellar);
    }
}

#[tokio::test]
async fn test_repeated_target_appends_to_one_file() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<Identifier> = vec![1.into(), 2.into(), 1.into()];
    let executor =
        RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2)).with_block_size(2);

    executor
        .retrieve::<StellarObservation>(stellar_job(ids).with_save_dir(dir.path()))
        .await
        .unwrap();

    let (meta, rows) = read_curve_file::<StellarObservation>(&dir.path().join("1.csv")).unwrap();
    assert_eq!(meta.id, Identifier::Numeric(1));
    assert_eq!(rows.len(), 2 * epochs_for(1));

    let loaded = load_collection::<StellarObservation>(dir.path()).unwrap();
    assert_eq!(loaded.row_count(), 2 * epochs_for(1) + epochs_for(2));
}

#[tokio::test]
async fn test_index_written_even_when_nothing_found() {
    let dir = TempDir::new().unwrap();
    let executor = RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(1));

    let job = stellar_job(vec![7.into(), 14.into()]).with_save_dir(dir.path());
    let output = executor.retrieve::<StellarObservation>(job).await.unwrap();

    match output {
        RetrievalOutput::Files(files) => assert_eq!(files, vec![dir.path().join("index.json")]),
        RetrievalOutput::Collection(_) => panic!("expected files in save mode"),
    }

    let loaded = load_collection::<StellarObservation>(dir.path()).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.row_count(), 0);
}

#[tokio::test]
async fn test_comet_designations_round_trip() {
    let dir = TempDir::new().unwrap();
    let entries = vec![
        IndexEntry::new("C/2020 F3 (NEOWISE)".into()).with_name("NEOWISE"),
        IndexEntry::new("1P/Halley".into()),
    ];
    let index = IndexTable::new(DatasetCategory::Comets.id_column(), entries);
    let job = RetrievalJob::from_index(DatasetCategory::Comets, index);

    let collection = RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2))
        .retrieve::<SolarSystemObservation>(job)
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    let paths = collection.save(dir.path(), true).unwrap();
    assert_eq!(paths.len(), 3);
    let neowise = paths[1].file_name().unwrap().to_string_lossy().to_string();
    assert!(neowise.starts_with("c_2020_f3_neowise_"), "{neowise}");
    assert!(paths[1].exists());

    let loaded = load_collection::<SolarSystemObservation>(dir.path()).unwrap();
    assert_eq!(loaded.rows(), collection.rows());
    let curve = loaded.curve(&"C/2020 F3 (NEOWISE)".into()).unwrap();
    assert_eq!(curve.meta.name.as_deref(), Some("NEOWISE"));
    assert_eq!(curve.len(), 2);
}

#[tokio::test]
async fn test_similar_designations_survive_round_trip() {
    let ids = Identifier::parse_list_for(
        "2000 AB, 2000 ab, C/2020 F3, C 2020 F3, 433",
        DatasetCategory::Asteroids,
    )
    .unwrap();
    let index = IndexTable::from_ids(DatasetCategory::Asteroids.id_column(), ids.clone());

    let collection = RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2))
        .retrieve::<SolarSystemObservation>(RetrievalJob::from_index(
            DatasetCategory::Asteroids,
            index.clone(),
        ))
        .await
        .unwrap()
        .into_collection()
        .unwrap();
    assert_eq!(collection.row_count(), 10);

    let saved = TempDir::new().unwrap();
    let paths = collection.save(saved.path(), true).unwrap();
    assert_eq!(paths.len(), 6);
    let loaded = load_collection::<SolarSystemObservation>(saved.path()).unwrap();
    assert_eq!(loaded.rows(), collection.rows());

    let streamed = TempDir::new().unwrap();
    let job =
        RetrievalJob::from_index(DatasetCategory::Asteroids, index).with_save_dir(streamed.path());
    RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(2))
        .with_block_size(1)
        .retrieve::<SolarSystemObservation>(job)
        .await
        .unwrap();
    let loaded = load_collection::<SolarSystemObservation>(streamed.path()).unwrap();
    assert_eq!(loaded.row_count(), 10);
    for id in &ids {
        assert_eq!(loaded.curve(id).unwrap().len(), 2, "{id}");
    }
}

#[tokio::test]
async fn test_load_rejects_wrong_row_type() {
    let dir = TempDir::new().unwrap();
    RetrievalExecutor::new(Arc::new(ScriptedSource::new()), backend(1))
        .retrieve::<StellarObservation>(stellar_job(vec![1.into()]).with_save_dir(dir.path()))
        .await
        .unwrap();

    assert!(load_collection::<SolarSystemObservation>(dir.path()).is_err());
}
