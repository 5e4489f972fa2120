//! Shared test utilities for evidence-ingest integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a full orchestrator over a temp directory, an
//!   in-memory database and a scripted text recognizer
//! - Builders for configurations and in-memory fixture documents

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
