pub mod bucketing;
pub mod collection;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod worker;

pub use error::{Result, TestdistError};
