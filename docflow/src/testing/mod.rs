//! Testing utilities for docflow pipelines.
//!
//! This module provides:
//! - An in-memory pipeline harness and document builders
//! - Scripted invokers and recording actors
//! - Assertions over document positions and stage maps

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_exception_count, assert_grade, assert_retry_count, assert_stage_state};
pub use fixtures::{DocumentFixture, TestPipeline};
pub use mocks::{FailingStore, FlakyStore, RecordingActor, ScriptedInvoker};
