//! Offline bin packing of test items into per-node buckets.
//!
//! Between runs, per-item durations are folded into a `bins.json` plan: an
//! ordered list of buckets, each an ordered list of item identifiers, sized
//! so the buckets take roughly equal wall-clock time. This module loads that
//! plan, discovers the current test universe, and greedily appends any item
//! the plan does not know about to the currently smallest bucket. Recording
//! the duration data and writing the plan back out belong to external
//! tooling; the planner only consumes the result.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{PlannerConfig, BINS_FILE, TEST_DIR_ENV};
use crate::error::{Result, TestdistError};

/// A partition of item identifiers into per-node buckets.
pub type Buckets = Vec<Vec<String>>;

/// Resolve the location of the bucket plan.
///
/// An explicit path wins; otherwise `$TEST_DIR/bins.json`, falling back to
/// `bins.json` in the current working directory.
pub fn resolve_bins_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let root = env::var_os(TEST_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    root.join(BINS_FILE)
}

/// Load a previously computed bucket plan.
///
/// The plan is a JSON array of arrays of item identifier strings. A missing
/// or malformed plan is a hard error; no partial partition is produced.
pub fn load_bins(explicit: Option<&Path>) -> Result<Buckets> {
    let path = resolve_bins_path(explicit);
    let contents = fs::read_to_string(&path).map_err(|source| TestdistError::PlanNotFound {
        path: path.clone(),
        source,
    })?;
    let bins: Buckets =
        serde_json::from_str(&contents).map_err(|source| TestdistError::PlanFormat {
            path: path.clone(),
            source,
        })?;
    tracing::debug!(path = %path.display(), buckets = bins.len(), "Loaded bucket plan");
    Ok(bins)
}

/// Discover every currently-known test item under the configured root.
///
/// Non-item artifacts (bytecode caches, package markers, fixture modules and
/// the configured excluded subtree) are filtered out by substring match
/// against the path. Order is reproducible within a process but not
/// guaranteed stable across runs.
pub fn discover_all_tests(config: &PlannerConfig) -> Result<Vec<String>> {
    if !config.tests_root.exists() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(&config.tests_root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_string_lossy().into_owned();
        if !path.ends_with(&config.file_suffix) {
            continue;
        }
        if config
            .exclude_markers
            .iter()
            .any(|marker| path.contains(marker.as_str()))
        {
            continue;
        }
        items.push(path);
    }
    Ok(items)
}

/// Return the items present in `all_tests` but absent from every bucket,
/// preserving the order of `all_tests`.
pub fn find_new_tests(bins: &[Vec<String>], all_tests: &[String]) -> Vec<String> {
    let binned: std::collections::HashSet<&str> = bins
        .iter()
        .flat_map(|bin| bin.iter().map(String::as_str))
        .collect();

    all_tests
        .iter()
        .filter(|test| !binned.contains(test.as_str()))
        .cloned()
        .collect()
}

/// Append each new item, in input order, to whichever bucket currently has
/// the fewest items (ties broken by lowest index).
///
/// Greedy online bin packing: not globally optimal but deterministic and
/// O(items * buckets). Returns a new partition; the input is never mutated.
/// The bucket count is fixed at planning time, so an empty plan leaves new
/// items unassigned rather than inventing a bucket.
pub fn bin_new_tests(bins: &[Vec<String>], new_tests: &[String]) -> Buckets {
    let mut bins: Buckets = bins.to_vec();
    if bins.is_empty() {
        if !new_tests.is_empty() {
            tracing::warn!(
                count = new_tests.len(),
                "Bucket plan has no buckets, new items left unassigned"
            );
        }
        return bins;
    }

    for test in new_tests {
        let smallest = bins
            .iter()
            .enumerate()
            .min_by_key(|(_, bin)| bin.len())
            .map(|(i, _)| i)
            .unwrap_or(0);
        bins[smallest].push(test.clone());
    }
    bins
}

/// Run the full planning step: load the persisted plan, discover the current
/// universe, and fold new items in. Returns the final partition together
/// with the list of newly appended items so callers can audit what changed.
pub fn bins_and_new_tests(config: &PlannerConfig) -> Result<(Buckets, Vec<String>)> {
    let bins = load_bins(config.bins_path.as_deref())?;
    let all_tests = discover_all_tests(config)?;
    let new_tests = find_new_tests(&bins, &all_tests);
    if !new_tests.is_empty() {
        tracing::info!(count = new_tests.len(), "Binning newly discovered items");
    }
    Ok((bin_new_tests(&bins, &new_tests), new_tests))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn find_new_tests_preserves_universe_order() {
        let bins = vec![bucket(&["a", "b"]), bucket(&["c"])];
        let all = bucket(&["d", "a", "e", "c"]);
        assert_eq!(find_new_tests(&bins, &all), bucket(&["d", "e"]));
    }

    #[test]
    fn bin_new_tests_appends_to_smallest_bucket() {
        let bins = vec![bucket(&["a", "b"]), bucket(&["c"])];
        let rebalanced = bin_new_tests(&bins, &bucket(&["d"]));
        assert_eq!(rebalanced, vec![bucket(&["a", "b"]), bucket(&["c", "d"])]);
        // Input partition untouched.
        assert_eq!(bins[1], bucket(&["c"]));
    }

    #[test]
    fn bin_new_tests_breaks_ties_by_lowest_index() {
        let bins = vec![bucket(&["a"]), bucket(&["b"])];
        let rebalanced = bin_new_tests(&bins, &bucket(&["c"]));
        assert_eq!(rebalanced[0], bucket(&["a", "c"]));
        assert_eq!(rebalanced[1], bucket(&["b"]));
    }

    #[test]
    fn bin_new_tests_without_buckets_stays_empty() {
        let rebalanced = bin_new_tests(&[], &bucket(&["a", "b"]));
        assert!(rebalanced.is_empty());
    }

    #[test]
    fn empty_universe_leaves_bins_unchanged() {
        let bins = vec![bucket(&["a"]), bucket(&["b", "c"])];
        let new = find_new_tests(&bins, &[]);
        assert!(new.is_empty());
        assert_eq!(bin_new_tests(&bins, &new), bins);
    }
}
