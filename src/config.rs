use std::path::PathBuf;

/// File name of the persisted bucket plan.
pub const BINS_FILE: &str = "bins.json";

/// Environment variable naming the root directory that holds the bucket plan.
pub const TEST_DIR_ENV: &str = "TEST_DIR";

/// Default path markers that disqualify a file from being a test item.
pub const DEFAULT_EXCLUDE_MARKERS: &[&str] = &[
    ".pyc",
    "__pycache__",
    "__init__.py",
    "conftest.py",
    "tests/incremental",
];

/// Configuration for the offline bucket planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Explicit path to the bucket plan. When `None`, the plan is resolved
    /// from `$TEST_DIR/bins.json`, falling back to the current directory.
    pub bins_path: Option<PathBuf>,
    /// Root of the test tree to discover items under.
    pub tests_root: PathBuf,
    /// Only files with this suffix count as test items.
    pub file_suffix: String,
    /// Substring markers excluding a path from discovery.
    pub exclude_markers: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            bins_path: None,
            tests_root: PathBuf::from("tests"),
            file_suffix: ".py".to_string(),
            exclude_markers: DEFAULT_EXCLUDE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl PlannerConfig {
    pub fn with_bins_path(mut self, path: PathBuf) -> Self {
        self.bins_path = Some(path);
        self
    }

    pub fn with_tests_root(mut self, root: PathBuf) -> Self {
        self.tests_root = root;
        self
    }
}

/// How the scheduler populates a node's assigned workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignStrategy {
    /// Each node is assigned the full index range of its own reported
    /// collection up front. Used when every node collected only its
    /// pre-planned bucket.
    FullCollection,
    /// Work units are formed by grouping the canonical collection by scope
    /// and handed out from a shared queue as nodes drain below the
    /// low-watermark.
    GroupedByScope,
}

/// Configuration for the live node scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of nodes expected to report a collection before the initial
    /// distribution may start.
    pub num_nodes: usize,
    pub strategy: AssignStrategy,
    /// A node is topped up with another work unit once its pending item
    /// count drops to this threshold or below. Only meaningful for
    /// [`AssignStrategy::GroupedByScope`].
    pub low_watermark: usize,
}

impl SchedulerConfig {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            strategy: AssignStrategy::FullCollection,
            low_watermark: 2,
        }
    }

    pub fn with_strategy(mut self, strategy: AssignStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_low_watermark(mut self, low_watermark: usize) -> Self {
        self.low_watermark = low_watermark;
        self
    }
}
