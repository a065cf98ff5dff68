//! opcycle-ca library interface
//!
//! Segments a sequence of per-frame operational states into work cycles, extracts
//! cycles declared in generative-model markup, and summarizes either set with
//! descriptive statistics.

pub mod error;
pub mod services;
pub mod types;
pub mod workflow;

pub use crate::error::{AnalysisError, Result};
