//! External-interface adapters
//!
//! Typed boundary to the vision-inference and recommendation collaborators.
//! The orchestrator depends only on the shapes here, never on which model
//! or LLM backs them. Collaborator failures degrade: inference errors are
//! surfaced as terminal failures, recommendation errors become a
//! best-effort textual fallback assembled from the findings list, and
//! neither crosses the boundary as a panic.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use radaid_common::types::{Modality, Urgency};

use crate::types::PredictionSet;
use crate::volume::{PlanarTensor, Volume};

/// Collaborator-side inference failure
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Model service unreachable or not loaded
    #[error("Inference service unavailable: {0}")]
    Unavailable(String),

    /// Opaque backend failure
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Collaborator-side recommendation failure
#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error("Recommendation service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Generated recommendation text plus urgency classification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub urgency: Urgency,
}

/// Vision inference boundary: tensor in, labeled probabilities out.
/// Implementations must be pure calls from the core's perspective.
///
/// Implementations only need to fill `probabilities`; the pipeline
/// re-derives positive findings and the top-k ranking from the configured
/// per-modality thresholds before anything downstream sees the result.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Run inference on one planar tensor
    async fn predict_planar(
        &self,
        tensor: &PlanarTensor,
        modality: Modality,
    ) -> Result<PredictionSet, InferenceError>;

    /// Run inference once on a whole volume
    async fn predict_volume(
        &self,
        volume: &Volume,
        modality: Modality,
    ) -> Result<PredictionSet, InferenceError>;
}

/// Recommendation boundary: findings in, report text + urgency out
#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn generate(
        &self,
        findings: &[String],
        probabilities: &HashMap<String, f32>,
    ) -> Result<Recommendation, RecommendationError>;
}

/// Derive positive findings and the ranked top-k list from a raw
/// probability map. Sorting is descending by probability with the label
/// name as deterministic tie-break.
pub fn rank_predictions(
    probabilities: HashMap<String, f32>,
    threshold: f32,
    top_k: usize,
) -> PredictionSet {
    let mut ranked: Vec<(String, f32)> = probabilities
        .iter()
        .map(|(label, &prob)| (label.clone(), prob))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let positive_findings: Vec<String> = ranked
        .iter()
        .filter(|(_, prob)| *prob >= threshold)
        .map(|(label, _)| label.clone())
        .collect();

    let top_predictions: Vec<(String, f32)> = ranked.into_iter().take(top_k).collect();

    PredictionSet {
        probabilities,
        positive_findings,
        top_predictions,
    }
}

/// Always-available recommender assembling a plain-text report from the
/// findings list. Used directly when no LLM-backed service is configured
/// and as the degradation target when one fails.
pub struct FallbackRecommender;

impl FallbackRecommender {
    pub fn report_text(findings: &[String], probabilities: &HashMap<String, f32>) -> String {
        if findings.is_empty() {
            return "No findings to report.".to_string();
        }
        let mut lines = vec!["FINDINGS:".to_string()];
        for finding in findings {
            match probabilities.get(finding) {
                Some(prob) => {
                    lines.push(format!("- {} (probability {:.0}%)", finding, prob * 100.0))
                }
                None => lines.push(format!("- {}", finding)),
            }
        }
        lines.push(String::new());
        lines.push(
            "RECOMMENDATION: Automated guidance unavailable. Correlate findings clinically \
             and consult departmental protocols."
                .to_string(),
        );
        lines.join("\n")
    }
}

#[async_trait]
impl RecommendationService for FallbackRecommender {
    async fn generate(
        &self,
        findings: &[String],
        probabilities: &HashMap<String, f32>,
    ) -> Result<Recommendation, RecommendationError> {
        Ok(Recommendation {
            text: Self::report_text(findings, probabilities),
            urgency: Urgency::Unknown,
        })
    }
}

/// Call a recommendation service with bounded retries and exponential
/// backoff, degrading to the textual fallback on exhaustion. Never returns
/// an error: the "must not throw across the boundary" contract lives here.
pub async fn with_recommendation_fallback(
    service: &dyn RecommendationService,
    findings: &[String],
    probabilities: &HashMap<String, f32>,
    max_attempts: u32,
) -> Recommendation {
    let mut backoff = Duration::from_millis(100);
    for attempt in 1..=max_attempts.max(1) {
        match service.generate(findings, probabilities).await {
            Ok(recommendation) => return recommendation,
            Err(e) => {
                warn!(attempt, error = %e, "Recommendation attempt failed");
                if attempt < max_attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    info!("Recommendation service exhausted; using textual fallback");
    Recommendation {
        text: FallbackRecommender::report_text(findings, probabilities),
        urgency: Urgency::Unknown,
    }
}

/// Process-wide, lazily initialized cache of loaded model handles.
///
/// Initialized at most once; concurrent readers share the same immutable
/// `Arc` handle after initialization. Initialization closures must be
/// idempotent and side-effect-free.
pub struct ModelCache<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> ModelCache<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Get the cached handle, loading it on first use
    pub fn get_or_load(&self, load: impl FnOnce() -> T) -> Arc<T> {
        self.cell
            .get_or_init(|| {
                info!("Initializing model cache");
                Arc::new(load())
            })
            .clone()
    }

    /// Handle if already loaded
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot flag recording whether the recommendation knowledge base has
/// been populated this process
static KNOWLEDGE_BASE_READY: OnceCell<bool> = OnceCell::new();

/// Mark the knowledge base populated (idempotent)
pub fn mark_knowledge_base_ready() {
    let _ = KNOWLEDGE_BASE_READY.set(true);
}

pub fn knowledge_base_ready() -> bool {
    KNOWLEDGE_BASE_READY.get().copied().unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
