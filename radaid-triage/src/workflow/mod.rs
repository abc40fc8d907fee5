//! Analysis orchestration state machine
//!
//! A study enters at `Intake` and always leaves through one of three
//! terminal envelopes: `Completed`, `Rejected` (validation), or `Failed`
//! (processing). Stages communicate failure by writing fields into the
//! per-study [`PipelineState`] rather than returning errors, so the graph
//! cannot exit without producing a well-formed result.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, Study};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use radaid_common::types::{DetectedModality, Modality, PatientMetadata, Urgency};

use crate::intake::{GuardrailVerdict, ModalityRelevance, WindowHint};
use crate::types::PredictionSet;
use crate::volume::{PlanarTensor, Volume};

/// Named pipeline stages, in graph order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intake,
    PlanarPath,
    PlanarInference,
    VolumetricGuard,
    VolumetricPath,
    VolumetricInference,
    Recommend,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::PlanarPath => "PlanarPath",
            Stage::PlanarInference => "PlanarInference",
            Stage::VolumetricGuard => "VolumetricGuard",
            Stage::VolumetricPath => "VolumetricPath",
            Stage::VolumetricInference => "VolumetricInference",
            Stage::Recommend => "Recommend",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal status of one study run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyStatus {
    /// Analysis ran; findings (possibly empty) are present
    Completed,
    /// Validation refused the input; non-retryable without different input
    Rejected,
    /// Processing failed after validation; non-retryable without remediation
    Failed,
}

/// Findings for one image (planar) or one volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingSet {
    pub positive_findings: Vec<String>,
    pub top_predictions: Vec<(String, f32)>,
}

impl From<&PredictionSet> for FindingSet {
    fn from(set: &PredictionSet) -> Self {
        Self {
            positive_findings: set.positive_findings.clone(),
            top_predictions: set.top_predictions.clone(),
        }
    }
}

/// Terminal result envelope. Uniform across paths: the caller can always
/// read status and reason without knowing which branch executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: StudyStatus,
    pub study_id: Uuid,
    pub modality: Option<DetectedModality>,
    pub patient: Option<PatientMetadata>,
    pub findings: Vec<FindingSet>,
    pub recommendations: Option<String>,
    pub urgency: Option<Urgency>,
    pub reason: Option<String>,
}

/// Mutable accumulator threaded through the graph. Created fresh per
/// study, discarded after the terminal envelope is produced. Each stage
/// writes only the fields it owns; no stage clears another stage's fields.
#[derive(Debug, Default)]
pub struct PipelineState {
    // Intake
    pub relevance: Option<ModalityRelevance>,
    pub metadata: Option<PatientMetadata>,
    pub window_hint: Option<WindowHint>,
    // VolumetricGuard
    pub guardrail: Option<GuardrailVerdict>,
    // PlanarPath / VolumetricPath
    pub planar_batch: Option<Vec<PlanarTensor>>,
    pub volume: Option<Volume>,
    pub preprocessing_error: Option<String>,
    // Inference
    pub predictions: Vec<PredictionSet>,
    // Recommend
    pub recommendation_text: Option<String>,
    pub urgency: Option<Urgency>,
}

impl PipelineState {
    /// Modality resolved at intake, if a single one was detected
    pub fn modality(&self) -> Option<Modality> {
        match self.relevance.as_ref().map(|r| r.modality) {
            Some(DetectedModality::Single(m)) => Some(m),
            _ => None,
        }
    }
}
