//! Shared test utilities for embedwatch integration tests.
//!
//! This module provides:
//! - Scripted fakes for the job API and the push channel
//! - Snapshot builders

pub mod fakes;

pub use fakes::*;
