//! Test helpers for authgate integration tests.
//!
//! - Mock upstream content host that records what it receives
//! - In-process gateway server and token builders

#![allow(unused_imports)] // Re-exports may not be used by all test files

pub mod gateway;
pub mod mock_upstream;

pub use gateway::*;
pub use mock_upstream::*;
