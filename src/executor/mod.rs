//! Test execution
//!
//! Sequential orchestration of call test cases.

mod runner;

pub use runner::{Collaborators, RunConfig, TestRunner};
