//! Shared utilities for keeper
//!
//! This crate provides the tracing setup shared by the keeper binaries.

pub mod logging;

pub use logging::{init_json_tracing, init_tracing};
