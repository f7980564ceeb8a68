//! Transaction Wrapper Integration Tests
//!
//! Tests for wrapped business functions running on the worker pool:
//! - Session lifecycle (exactly one close, commit/abort discipline)
//! - Error taxonomy as seen by callers
//! - Read-only mode never persisting
//! - Behavior under concurrent callers

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod errors;
mod lifecycle;
