//! End-to-end retrievals against the scripted backend
//!
//! Tests verify:
//! - Assembled rows keep block order whatever the concurrency
//! - First attempts are spread round-robin over the shards
//! - A retrieval where every first attempt succeeds never backs off
//! - Blocks without data contribute nothing and do not fail the retrieval
//! - Solar-system categories use the name-keyed schema

use crate::support::{backend, epochs_for, numeric_ids, ScriptedSource};
use skypatrol_downloader::collection::IndexTable;
use skypatrol_downloader::identifier::Identifier;
use skypatrol_downloader::retrieval::{RetrievalExecutor, RetrievalJob};
use skypatrol_downloader::{DatasetCategory, PhotFilter, SolarSystemObservation, StellarObservation};
use std::sync::Arc;
use std::time::Duration;

fn stellar_job(ids: Vec<Identifier>) -> RetrievalJob {
    let index = IndexTable::from_ids(DatasetCategory::Stellar.id_column(), ids.clone());
    RetrievalJob::new(DatasetCategory::Stellar, ids, index)
}

#[tokio::test]
async fn test_row_order_independent_of_concurrency() {
    let ids = numeric_ids(30);
    let mut results = Vec::new();

    for concurrency in [1, 3, 8] {
        let source = Arc::new(ScriptedSource::new().with_jitter());
        let executor = RetrievalExecutor::new(source, backend(3))
            .with_block_size(4)
            .with_concurrency(concurrency);
        let collection = executor
            .retrieve::<StellarObservation>(stellar_job(ids.clone()))
            .await
            .unwrap()
            .into_collection()
            .unwrap();
        results.push(collection.into_rows());
    }

    let expected_rows: usize = (1..=30).map(epochs_for).sum();
    assert_eq!(results[0].len(), expected_rows);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);

    // Block order, then payload order within a block
    let order: Vec<u64> = results[0].iter().map(|m| m.observation.asas_sn_id).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[tokio::test]
async fn test_first_attempts_round_robin() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source.clone(), backend(3)).with_block_size(2);

    let collection = executor
        .retrieve::<StellarObservation>(stellar_job(numeric_ids(5)))
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    assert_eq!(source.calls().len(), 3);
    assert_eq!(source.calls_for(0), vec!["db0"]);
    assert_eq!(source.calls_for(1), vec!["db1"]);
    assert_eq!(source.calls_for(2), vec!["db2"]);
    assert_eq!(collection.row_count(), (1..=5).map(epochs_for).sum::<usize>());
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_never_sleeps() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source.clone(), backend(3))
        .with_block_size(2)
        .with_concurrency(4);

    let started = tokio::time::Instant::now();
    executor
        .retrieve::<StellarObservation>(stellar_job(numeric_ids(12)))
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(source.calls().len(), 6);
}

#[tokio::test]
async fn test_block_without_data_yields_no_rows() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source, backend(2)).with_block_size(2);
    let ids: Vec<Identifier> = vec![7.into(), 14.into(), 1.into(), 2.into()];

    let collection = executor
        .retrieve::<StellarObservation>(stellar_job(ids))
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    assert_eq!(collection.len(), 4);
    assert_eq!(collection.row_count(), epochs_for(1) + epochs_for(2));
    assert!(collection.curve(&Identifier::Numeric(7)).unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_request_makes_no_calls() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source.clone(), backend(2));

    let collection = executor
        .retrieve::<StellarObservation>(stellar_job(Vec::new()))
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    assert!(collection.is_empty());
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_curves_sorted_and_filters_classified() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source, backend(1));

    let collection = executor
        .retrieve::<StellarObservation>(stellar_job(vec![5.into()]))
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    // id 5 has three epochs served newest first
    let curve = collection.curve(&Identifier::Numeric(5)).unwrap();
    let jds: Vec<f64> = curve.measurements.iter().map(|m| m.observation.jd).collect();
    assert_eq!(jds, vec![2_458_008.5, 2_458_009.5, 2_458_010.5]);
    assert_eq!(curve.filter(PhotFilter::G).count(), 1);
    assert_eq!(curve.filter(PhotFilter::V).count(), 2);
}

#[tokio::test]
async fn test_asteroid_retrieval() {
    let source = Arc::new(ScriptedSource::new());
    let executor = RetrievalExecutor::new(source, backend(2)).with_block_size(1);
    let ids: Vec<Identifier> = vec!["Ceres".into(), "Unknown 1".into(), "Vesta".into()];
    let index = IndexTable::from_ids(DatasetCategory::Asteroids.id_column(), ids.clone());
    let job = RetrievalJob::new(DatasetCategory::Asteroids, ids, index);

    let collection = executor
        .retrieve::<SolarSystemObservation>(job)
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    let names: Vec<&str> = collection
        .rows()
        .iter()
        .map(|m| m.observation.name.as_str())
        .collect();
    assert_eq!(names, vec!["Ceres", "Ceres", "Vesta", "Vesta"]);
    assert!(collection.rows().iter().all(|m| m.phot_filter == PhotFilter::G));
    assert_eq!(collection.id_column(), "name");
}
