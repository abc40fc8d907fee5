//! Shared types for the radaid study triage services
//!
//! Holds the pieces every radaid crate needs: the common error type,
//! configuration loading, core imaging domain types (modality, CT window
//! presets, urgency), pipeline progress events, and tracing setup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod types;

pub use crate::config::TriageConfig;
pub use crate::error::{Error, Result};
