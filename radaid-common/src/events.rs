//! Event types for pipeline progress reporting
//!
//! Emitted by the orchestrator on an optional channel so callers can stream
//! study progress without coupling to pipeline internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Study entered the pipeline
    StudyStarted {
        study_id: Uuid,
        slice_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A stage began executing
    StageStarted {
        study_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished executing
    StageCompleted {
        study_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// Study rejected by validation
    StudyRejected {
        study_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Study failed during processing
    StudyFailed {
        study_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Study completed with findings
    StudyCompleted {
        study_id: Uuid,
        finding_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Study this event belongs to
    pub fn study_id(&self) -> Uuid {
        match self {
            PipelineEvent::StudyStarted { study_id, .. }
            | PipelineEvent::StageStarted { study_id, .. }
            | PipelineEvent::StageCompleted { study_id, .. }
            | PipelineEvent::StudyRejected { study_id, .. }
            | PipelineEvent::StudyFailed { study_id, .. }
            | PipelineEvent::StudyCompleted { study_id, .. } => *study_id,
        }
    }
}
