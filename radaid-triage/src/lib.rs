//! radaid-triage: DICOM study triage pipeline
//!
//! Ingests the slices of one diagnostic study, validates that they form a
//! coherent series, normalizes pixel data into model-ready tensors, and
//! routes the study through a planar (CR/DX) or volumetric (CT/MR) analysis
//! path. Every exit is a typed terminal envelope; validation and processing
//! failures travel as data, never as panics or errors escaping the graph.
//!
//! # Architecture
//! - `intake`: metadata-only series validation (modality consensus,
//!   guardrails, window hints)
//! - `volume`: tensor construction (windowing, percentile normalization,
//!   spatial/depth resampling)
//! - `workflow`: the orchestration state machine and result envelope
//! - `adapters`: typed boundary to the vision-inference and recommendation
//!   collaborators

pub mod adapters;
pub mod intake;
pub mod types;
pub mod volume;
pub mod workflow;

pub use crate::adapters::{InferenceService, RecommendationService};
pub use crate::types::{DecodeError, SliceDecoder, SliceLocator};
pub use crate::volume::{Volume, VolumeBuilder, VolumeError, VolumeOptions};
pub use crate::workflow::{Orchestrator, ResultEnvelope, Study, StudyStatus};
