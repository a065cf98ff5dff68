//! # opcycle Common Library
//!
//! Shared code for the opcycle crates:
//! - Closed state/event vocabulary
//! - Configuration loading (TOML, resolution priority)
//! - Timestamp and duration text conversion
//! - Common error type

pub mod config;
pub mod error;
pub mod human_time;
pub mod vocabulary;

pub use error::{Error, Result};
pub use vocabulary::{EventType, OperationalState, VOCABULARY_VERSION};
