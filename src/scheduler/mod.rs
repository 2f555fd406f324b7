pub mod loadscope;
pub mod scope;
pub mod workqueue;

pub use loadscope::LoadScopeScheduler;
pub use scope::split_scope;
pub use workqueue::{pending_of, ScopeKey, WorkQueue, WorkUnit, Workload};
