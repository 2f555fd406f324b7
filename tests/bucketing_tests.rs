use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::TempDir;

use testdist::bucketing::{
    bin_new_tests, bins_and_new_tests, discover_all_tests, find_new_tests, load_bins,
};
use testdist::config::{PlannerConfig, TEST_DIR_ENV};
use testdist::error::TestdistError;

fn items(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn write_bins(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("bins.json");
    fs::write(&path, contents).unwrap();
    path
}

// ==================== Plan loading ====================

#[test]
fn test_load_bins_from_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = write_bins(&dir, r#"[["a", "b"], ["c"]]"#);

    let bins = load_bins(Some(&path)).unwrap();
    assert_eq!(bins, vec![items(&["a", "b"]), items(&["c"])]);
}

#[test]
fn test_load_bins_missing_plan_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");
    let err = load_bins(Some(&path)).unwrap_err();
    assert!(matches!(err, TestdistError::PlanNotFound { .. }));
}

#[test]
fn test_load_bins_malformed_plan_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = write_bins(&dir, r#"{"not": "a plan"}"#);
    let err = load_bins(Some(&path)).unwrap_err();
    assert!(matches!(err, TestdistError::PlanFormat { .. }));
}

/// Serializes tests that mutate the process environment; cargo runs tests
/// on multiple threads and the environment is process-global.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_load_bins_resolves_root_from_environment() {
    let _env = ENV_LOCK.lock().unwrap();
    let dir = TempDir::new().unwrap();
    write_bins(&dir, r#"[["x"]]"#);

    let previous = std::env::var_os(TEST_DIR_ENV);
    std::env::set_var(TEST_DIR_ENV, dir.path());
    let bins = load_bins(None);
    match previous {
        Some(value) => std::env::set_var(TEST_DIR_ENV, value),
        None => std::env::remove_var(TEST_DIR_ENV),
    }

    assert_eq!(bins.unwrap(), vec![items(&["x"])]);
}

#[test]
fn test_load_bins_explicit_path_ignores_environment() {
    let _env = ENV_LOCK.lock().unwrap();
    let env_dir = TempDir::new().unwrap();
    write_bins(&env_dir, r#"[["wrong"]]"#);
    let dir = TempDir::new().unwrap();
    let path = write_bins(&dir, r#"[["right"]]"#);

    let previous = std::env::var_os(TEST_DIR_ENV);
    std::env::set_var(TEST_DIR_ENV, env_dir.path());
    let bins = load_bins(Some(&path));
    match previous {
        Some(value) => std::env::set_var(TEST_DIR_ENV, value),
        None => std::env::remove_var(TEST_DIR_ENV),
    }

    assert_eq!(bins.unwrap(), vec![items(&["right"])]);
}

// ==================== Rebalancing ====================

/// Plan [["a","b"],["c"]] with universe ["a","b","c","d"]: only "d" is new
/// and it lands in the smaller bucket.
#[test]
fn test_new_item_lands_in_smallest_bucket() {
    let bins = vec![items(&["a", "b"]), items(&["c"])];
    let universe = items(&["a", "b", "c", "d"]);

    let new_tests = find_new_tests(&bins, &universe);
    assert_eq!(new_tests, items(&["d"]));

    let rebalanced = bin_new_tests(&bins, &new_tests);
    assert_eq!(rebalanced, vec![items(&["a", "b"]), items(&["c", "d"])]);
}

/// The rebalanced partition covers the universe plus the original buckets,
/// with no item in two buckets.
#[test]
fn test_partition_coverage_and_exclusivity() {
    let bins = vec![items(&["a", "stale"]), items(&["b"]), items(&["c", "d"])];
    let universe = items(&["a", "b", "c", "d", "e", "f", "g"]);

    let rebalanced = bin_new_tests(&bins, &find_new_tests(&bins, &universe));

    let mut seen = HashSet::new();
    for bin in &rebalanced {
        for item in bin {
            assert!(seen.insert(item.clone()), "{item} appears in two buckets");
        }
    }
    let expected: HashSet<String> = universe
        .iter()
        .chain(bins.iter().flatten())
        .cloned()
        .collect();
    assert_eq!(seen, expected);
}

/// Greedy placement keeps buckets within one item of each other when
/// growing from an even start.
#[test]
fn test_greedy_balance_bound() {
    let bins = vec![Vec::new(), Vec::new(), Vec::new()];
    let new_tests: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();

    let rebalanced = bin_new_tests(&bins, &new_tests);
    let sizes: Vec<usize> = rebalanced.iter().map(Vec::len).collect();
    let largest = sizes.iter().max().unwrap();
    let smallest = sizes.iter().min().unwrap();
    assert!(largest - smallest <= 1, "sizes {sizes:?} out of balance");
    assert_eq!(sizes.iter().sum::<usize>(), 10);
}

// ==================== Discovery ====================

#[test]
fn test_discovery_filters_non_items() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tests");
    fs::create_dir_all(root.join("unit")).unwrap();
    fs::create_dir_all(root.join("unit/__pycache__")).unwrap();
    fs::create_dir_all(root.join("incremental")).unwrap();
    fs::write(root.join("unit/test_a.py"), "").unwrap();
    fs::write(root.join("unit/test_b.py"), "").unwrap();
    fs::write(root.join("unit/__init__.py"), "").unwrap();
    fs::write(root.join("unit/conftest.py"), "").unwrap();
    fs::write(root.join("unit/__pycache__/test_a.py"), "").unwrap();
    fs::write(root.join("unit/notes.txt"), "").unwrap();
    fs::write(root.join("incremental/test_c.py"), "").unwrap();

    let config = PlannerConfig::default().with_tests_root(root.clone());
    let mut discovered = discover_all_tests(&config).unwrap();
    discovered.sort();

    let mut expected = vec![
        root.join("unit/test_a.py").to_string_lossy().into_owned(),
        root.join("unit/test_b.py").to_string_lossy().into_owned(),
    ];
    expected.sort();
    assert_eq!(discovered, expected);
}

#[test]
fn test_discovery_of_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    let config = PlannerConfig::default().with_tests_root(dir.path().join("nope"));
    assert!(discover_all_tests(&config).unwrap().is_empty());
}

// ==================== Composite planning ====================

#[test]
fn test_bins_and_new_tests_appends_discovered_items() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tests");
    fs::create_dir_all(&root).unwrap();
    let known = root.join("test_known.py").to_string_lossy().into_owned();
    fs::write(root.join("test_known.py"), "").unwrap();
    fs::write(root.join("test_fresh.py"), "").unwrap();

    let plan = serde_json::to_string(&vec![vec![known.clone(), "gone.py".to_string()], vec![]])
        .unwrap();
    let bins_path = write_bins(&dir, &plan);

    let config = PlannerConfig::default()
        .with_bins_path(bins_path)
        .with_tests_root(root.clone());
    let (bins, new_tests) = bins_and_new_tests(&config).unwrap();

    let fresh = root.join("test_fresh.py").to_string_lossy().into_owned();
    assert_eq!(new_tests, vec![fresh.clone()]);
    // Items already planned stay put, even if no longer on disk; the fresh
    // item fills the smaller bucket.
    assert_eq!(bins[0], vec![known, "gone.py".to_string()]);
    assert_eq!(bins[1], vec![fresh]);
}

#[test]
fn test_empty_universe_adds_nothing() {
    let dir = TempDir::new().unwrap();
    let bins_path = write_bins(&dir, r#"[["a"], ["b"]]"#);

    let config = PlannerConfig::default()
        .with_bins_path(bins_path)
        .with_tests_root(dir.path().join("no-tests-here"));
    let (bins, new_tests) = bins_and_new_tests(&config).unwrap();
    assert!(new_tests.is_empty());
    assert_eq!(bins, vec![items(&["a"]), items(&["b"])]);
}
