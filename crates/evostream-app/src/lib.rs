//! Shared plumbing for the evostream demo driver.

pub mod demo;
pub mod report;
pub mod runner;

pub use demo::{DemoCommunity, DemoConfig};
pub use report::RunReport;
pub use runner::{RunOptions, run_pipeline};
