#![allow(missing_docs)]

use std::fs;

use gnnpipe::cache::{persist_rankings, rank_by_degree, rank_by_heuristic};
use gnnpipe::graph::{
    import_edge_csv, SyntheticGraph, CACHE_BY_DEGREE_FILE, CACHE_BY_HEURISTIC_FILE, FEAT_FILE,
    INDICES_FILE, META_FILE,
};
use gnnpipe::{Dataset, DatasetBuilder, GnnError};
use tempfile::TempDir;

fn small() -> Dataset {
    let feat: Vec<f32> = (0..5).flat_map(|v| [v as f32, v as f32 * 10.0]).collect();
    DatasetBuilder::new(5)
        .edges([(0, 1), (0, 2), (1, 2), (3, 2), (4, 0)])
        .features(2, feat)
        .labels(3, vec![0, 1, 2, 0, 1])
        .train_set(vec![0, 3])
        .valid_set(vec![1])
        .test_set(vec![4])
        .build()
        .expect("build dataset")
}

#[test]
fn save_then_load_preserves_every_array() {
    let dir = TempDir::new().expect("tempdir");
    let original = small();
    original.save(dir.path()).expect("save");
    let loaded = Dataset::load(dir.path()).expect("load");

    assert_eq!(loaded.meta(), original.meta());
    assert_eq!(loaded.indptr(), original.indptr());
    assert_eq!(loaded.indices(), original.indices());
    assert_eq!(loaded.features(), original.features());
    assert_eq!(loaded.labels(), original.labels());
    assert_eq!(loaded.train_set(), original.train_set());
    assert_eq!(loaded.valid_set(), original.valid_set());
    assert_eq!(loaded.test_set(), original.test_set());
    assert_eq!(loaded.in_degrees(), original.in_degrees());
    assert_eq!(loaded.feature_row(4), &[4.0, 40.0]);
}

#[test]
fn missing_features_load_as_zeros() {
    let dir = TempDir::new().expect("tempdir");
    small().save(dir.path()).expect("save");
    fs::remove_file(dir.path().join(FEAT_FILE)).expect("remove features");
    let loaded = Dataset::load(dir.path()).expect("load");
    assert!(loaded.features().iter().all(|v| *v == 0.0));
    assert_eq!(loaded.features().len(), 5 * 2);
}

#[test]
fn missing_or_truncated_files_are_reported_by_name() {
    let dir = TempDir::new().expect("tempdir");
    small().save(dir.path()).expect("save");

    fs::write(dir.path().join(INDICES_FILE), [0u8; 4]).expect("truncate indices");
    match Dataset::load(dir.path()) {
        Err(GnnError::Dataset { file, .. }) => assert_eq!(file, INDICES_FILE),
        other => panic!("expected dataset error, got {other:?}"),
    }

    fs::remove_file(dir.path().join(META_FILE)).expect("remove meta");
    match Dataset::load(dir.path()) {
        Err(GnnError::Dataset { file, .. }) => assert_eq!(file, META_FILE),
        other => panic!("expected dataset error, got {other:?}"),
    }
}

#[test]
fn builder_rejects_out_of_range_edges() {
    let err = DatasetBuilder::new(2).edge(0, 5).build().unwrap_err();
    assert!(matches!(err, GnnError::InvalidArgument(_)));
}

#[test]
fn persisted_rankings_are_read_back() {
    let dir = TempDir::new().expect("tempdir");
    let dataset = small();
    dataset.save(dir.path()).expect("save");
    persist_rankings(&dataset, dir.path()).expect("persist rankings");
    assert!(dir.path().join(CACHE_BY_DEGREE_FILE).exists());
    assert!(dir.path().join(CACHE_BY_HEURISTIC_FILE).exists());

    let loaded = Dataset::load(dir.path()).expect("load");
    assert_eq!(rank_by_degree(&loaded), rank_by_degree(&dataset));
    assert_eq!(rank_by_heuristic(&loaded), rank_by_heuristic(&dataset));
    assert_eq!(rank_by_degree(&loaded)[0], 2);
}

#[test]
fn synthetic_graphs_are_reproducible() {
    let a = SyntheticGraph::new(200, 6).seed(9).build().expect("generate");
    let b = SyntheticGraph::new(200, 6).seed(9).build().expect("generate");
    let c = SyntheticGraph::new(200, 6).seed(10).build().expect("generate");
    assert_eq!(a.indices(), b.indices());
    assert_eq!(a.train_set(), b.train_set());
    assert_ne!(a.indices(), c.indices());
    assert_eq!(a.num_nodes(), 200);
    assert!(!a.train_set().is_empty());
}

#[test]
fn weighted_synthetic_graph_survives_a_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let original = SyntheticGraph::new(64, 4)
        .weighted(true)
        .seed(3)
        .build()
        .expect("generate");
    original.save(dir.path()).expect("save");
    let loaded = Dataset::load(dir.path()).expect("load");
    assert_eq!(loaded.edge_weights(), original.edge_weights());
    assert_eq!(
        loaded.weight_tables().prob(),
        original.weight_tables().prob()
    );
}

#[test]
fn imported_csv_feeds_a_saved_dataset() {
    let dir = TempDir::new().expect("tempdir");
    let csv = dir.path().join("edges.csv");
    fs::write(&csv, "src,dst\n0,1\n1,2\n2,0\n3,0\n").expect("write csv");
    let dataset = import_edge_csv(&csv, 8, 0.5, 7).expect("import");
    let out = dir.path().join("ds");
    dataset.save(&out).expect("save");
    let loaded = Dataset::load(&out).expect("load");
    assert_eq!(loaded.num_nodes(), 4);
    assert_eq!(loaded.num_edges(), 4);
    assert_eq!(loaded.neighbors(0), &[2, 3]);
    assert_eq!(loaded.feat_dim(), 8);
    assert_eq!(loaded.train_set().len(), 2);
}
