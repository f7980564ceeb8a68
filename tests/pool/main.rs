//! Worker Pool Integration Tests
//!
//! Tests for the pool as the backend uses it:
//! - Bounded concurrency and queueing
//! - Shutdown through the hook, exactly once

#[path = "../common/mod.rs"]
mod common;

mod bounds;
mod shutdown;
