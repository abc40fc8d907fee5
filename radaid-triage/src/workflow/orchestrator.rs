//! Pipeline orchestrator
//!
//! Routes one study through the planar or volumetric analysis path based on
//! the modality detected at intake, and guarantees a terminal envelope on
//! every exit. Stage outcomes are written into [`PipelineState`]; nothing
//! on the happy or sad path raises past this module.
//!
//! # Error handling
//! - Validation verdicts terminate as `Rejected` with the verdict's reason
//! - Volume construction errors terminate as `Failed`, no inference run
//! - Inference errors are retried, then terminate as `Failed`
//! - Recommendation errors degrade to a textual fallback, never terminal
//! - Stage timeouts and cancellation terminate as `Failed`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use radaid_common::events::PipelineEvent;
use radaid_common::types::Modality;
use radaid_common::TriageConfig;

use super::{FindingSet, PipelineState, ResultEnvelope, Stage, StudyStatus};
use crate::adapters::{
    rank_predictions, with_recommendation_fallback, InferenceService, RecommendationService,
};
use crate::intake::IntakeValidator;
use crate::types::{PredictionSet, SliceDecoder, SliceLocator};
use crate::volume::{VolumeBuilder, VolumeOptions};

/// Inference retry attempts before a `Failed` terminal
const INFERENCE_ATTEMPTS: u32 = 2;
/// Recommendation retry attempts before degrading to the fallback
const RECOMMENDATION_ATTEMPTS: u32 = 3;
/// Top predictions pulled per image when nothing crosses the positivity
/// threshold
const TOP_FALLBACK_FINDINGS: usize = 3;

/// One study to analyze
#[derive(Debug, Clone)]
pub struct Study {
    pub study_id: Uuid,
    pub locators: Vec<SliceLocator>,
    /// Caller windowing/shape overrides
    pub options: VolumeOptions,
}

impl Study {
    pub fn new(locators: Vec<SliceLocator>) -> Self {
        Self {
            study_id: Uuid::new_v4(),
            locators,
            options: VolumeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VolumeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Analysis pipeline orchestrator
pub struct Orchestrator {
    config: TriageConfig,
    intake: IntakeValidator,
    builder: VolumeBuilder,
    decoder: Arc<dyn SliceDecoder>,
    inference: Arc<dyn InferenceService>,
    recommender: Arc<dyn RecommendationService>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    cancel: Option<CancellationToken>,
}

impl Orchestrator {
    pub fn new(
        config: TriageConfig,
        decoder: Arc<dyn SliceDecoder>,
        inference: Arc<dyn InferenceService>,
        recommender: Arc<dyn RecommendationService>,
    ) -> Self {
        Self {
            intake: IntakeValidator::new(config.clone()),
            builder: VolumeBuilder::new(config.clone()),
            config,
            decoder,
            inference,
            recommender,
            event_tx: None,
            cancel: None,
        }
    }

    /// Attach a progress event channel
    pub fn with_events(mut self, event_tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Attach a cancellation token, checked between stages
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run one study to a terminal envelope. Never returns an error and
    /// never panics on collaborator failure.
    pub async fn run(&self, study: Study) -> ResultEnvelope {
        let study_id = study.study_id;
        info!(study_id = %study_id, slices = study.locators.len(), "Study entered pipeline");
        self.emit(PipelineEvent::StudyStarted {
            study_id,
            slice_count: study.locators.len(),
            timestamp: Utc::now(),
        })
        .await;

        let mut state = PipelineState::default();
        let envelope = self.drive(&study, &mut state).await;

        match envelope.status {
            StudyStatus::Completed => {
                self.emit(PipelineEvent::StudyCompleted {
                    study_id,
                    finding_count: envelope.findings.len(),
                    timestamp: Utc::now(),
                })
                .await
            }
            StudyStatus::Rejected => {
                self.emit(PipelineEvent::StudyRejected {
                    study_id,
                    reason: envelope.reason.clone().unwrap_or_default(),
                    timestamp: Utc::now(),
                })
                .await
            }
            StudyStatus::Failed => {
                self.emit(PipelineEvent::StudyFailed {
                    study_id,
                    reason: envelope.reason.clone().unwrap_or_default(),
                    timestamp: Utc::now(),
                })
                .await
            }
        }
        envelope
    }

    /// Walk the graph, writing stage outputs into `state`
    async fn drive(&self, study: &Study, state: &mut PipelineState) -> ResultEnvelope {
        // ---- Intake ----------------------------------------------------
        self.stage_started(study.study_id, Stage::Intake).await;
        let relevance = self
            .intake
            .check_modality_relevance(self.decoder.as_ref(), &study.locators);
        state.relevance = Some(relevance.clone());

        if !relevance.is_relevant {
            let reason = relevance
                .error
                .clone()
                .unwrap_or_else(|| "Study modality is mixed or not supported".to_string());
            return self.rejected(study, state, reason);
        }
        state.metadata = Some(
            self.intake
                .extract_metadata(self.decoder.as_ref(), &study.locators),
        );
        self.stage_completed(study.study_id, Stage::Intake).await;

        let modality = match state.modality() {
            Some(m) => m,
            // Relevance and allow-list make this unreachable; fail closed
            // rather than panic if a custom allow-list admits "OTHER"
            None => Modality::Other,
        };

        if modality.is_planar() {
            self.planar_branch(study, state, modality).await
        } else {
            self.volumetric_branch(study, state, modality).await
        }
    }

    // ---- Planar branch (CR/DX) -----------------------------------------

    async fn planar_branch(
        &self,
        study: &Study,
        state: &mut PipelineState,
        modality: Modality,
    ) -> ResultEnvelope {
        if let Some(envelope) = self.check_cancelled(study, state, Stage::PlanarPath) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::PlanarPath).await;

        let batch = match self
            .builder
            .build_planar_batch(self.decoder.as_ref(), &study.locators)
        {
            Ok(batch) => batch,
            Err(e) => {
                state.preprocessing_error = Some(e.to_string());
                return self.failed(study, state, e.to_string());
            }
        };
        self.stage_completed(study.study_id, Stage::PlanarPath).await;

        if let Some(envelope) = self.check_cancelled(study, state, Stage::PlanarInference) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::PlanarInference)
            .await;

        // One inference call per slice; each tensor is independent
        for tensor in &batch {
            let prediction = self
                .bounded(self.predict_planar_with_retry(tensor, modality))
                .await;
            match prediction {
                Ok(Ok(set)) => state
                    .predictions
                    .push(self.finalize_predictions(set, modality)),
                Ok(Err(e)) => return self.failed(study, state, e),
                Err(timeout_reason) => return self.failed(study, state, timeout_reason),
            }
        }
        state.planar_batch = Some(batch);
        self.stage_completed(study.study_id, Stage::PlanarInference)
            .await;

        self.recommend(study, state).await
    }

    // ---- Volumetric branch (CT/MR) -------------------------------------

    async fn volumetric_branch(
        &self,
        study: &Study,
        state: &mut PipelineState,
        modality: Modality,
    ) -> ResultEnvelope {
        if let Some(envelope) = self.check_cancelled(study, state, Stage::VolumetricGuard) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::VolumetricGuard)
            .await;
        let verdict = self
            .intake
            .guardrail(self.decoder.as_ref(), &study.locators);
        state.guardrail = Some(verdict.clone());

        if !verdict.is_relevant {
            let reason = verdict
                .stop_reason
                .unwrap_or_else(|| "Series failed volumetric guardrail".to_string());
            return self.rejected(study, state, reason);
        }
        self.stage_completed(study.study_id, Stage::VolumetricGuard)
            .await;

        if let Some(envelope) = self.check_cancelled(study, state, Stage::VolumetricPath) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::VolumetricPath)
            .await;

        let hint = self
            .intake
            .extract_window_hint(self.decoder.as_ref(), &study.locators);
        state.window_hint = Some(hint.clone());

        // Volume construction is CPU-bound; run it off the async threads so
        // the stage timeout stays enforceable
        let decoder = Arc::clone(&self.decoder);
        let builder = VolumeBuilder::new(self.config.clone());
        let locators = study.locators.clone();
        let build_hint = hint.clone();
        let options = study.options.clone();
        let built = self
            .bounded(tokio::task::spawn_blocking(move || {
                builder.build_volume(decoder.as_ref(), &locators, &build_hint, &options)
            }))
            .await;
        let volume = match built {
            Ok(Ok(Ok(volume))) => volume,
            Ok(Ok(Err(e))) => {
                warn!(study_id = %study.study_id, error = %e, "Volume construction failed");
                state.preprocessing_error = Some(e.to_string());
                return self.failed(study, state, e.to_string());
            }
            Ok(Err(join_error)) => {
                return self.failed(
                    study,
                    state,
                    format!("Volume construction task failed: {}", join_error),
                )
            }
            Err(timeout_reason) => return self.failed(study, state, timeout_reason),
        };
        self.stage_completed(study.study_id, Stage::VolumetricPath)
            .await;

        if let Some(envelope) = self.check_cancelled(study, state, Stage::VolumetricInference) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::VolumetricInference)
            .await;

        let prediction = self
            .bounded(self.predict_volume_with_retry(&volume, modality))
            .await;
        match prediction {
            Ok(Ok(set)) => state
                .predictions
                .push(self.finalize_predictions(set, modality)),
            Ok(Err(e)) => return self.failed(study, state, e),
            Err(timeout_reason) => return self.failed(study, state, timeout_reason),
        }
        state.volume = Some(volume);
        self.stage_completed(study.study_id, Stage::VolumetricInference)
            .await;

        self.recommend(study, state).await
    }

    // ---- Recommend ------------------------------------------------------

    async fn recommend(&self, study: &Study, state: &mut PipelineState) -> ResultEnvelope {
        if let Some(envelope) = self.check_cancelled(study, state, Stage::Recommend) {
            return envelope;
        }
        self.stage_started(study.study_id, Stage::Recommend).await;

        // Union of positive findings, deduplicated, first appearance order
        let mut findings: Vec<String> = Vec::new();
        let mut probabilities: HashMap<String, f32> = HashMap::new();
        for set in &state.predictions {
            for finding in &set.positive_findings {
                if !findings.contains(finding) {
                    findings.push(finding.clone());
                }
            }
            for (label, prob) in &set.top_predictions {
                probabilities.entry(label.clone()).or_insert(*prob);
            }
        }

        // Nothing positive: fall back to each image's top-ranked findings
        if findings.is_empty() {
            for set in &state.predictions {
                for (label, _) in set.top_predictions.iter().take(TOP_FALLBACK_FINDINGS) {
                    if !findings.contains(label) {
                        findings.push(label.clone());
                    }
                }
            }
        }

        if findings.is_empty() {
            // No findings at all: skip recommendation entirely
            debug!(study_id = %study.study_id, "No findings; skipping recommendation");
            return self.completed(study, state);
        }

        let recommendation = with_recommendation_fallback(
            self.recommender.as_ref(),
            &findings,
            &probabilities,
            RECOMMENDATION_ATTEMPTS,
        )
        .await;
        state.recommendation_text = Some(recommendation.text);
        state.urgency = Some(recommendation.urgency);
        self.stage_completed(study.study_id, Stage::Recommend).await;

        self.completed(study, state)
    }

    // ---- Inference helpers ----------------------------------------------

    /// Re-derive positive findings and the ranked top-k list from the raw
    /// probability map using the configured per-modality threshold. The
    /// inference boundary supplies probabilities; the positivity contract
    /// is applied here.
    fn finalize_predictions(&self, raw: PredictionSet, modality: Modality) -> PredictionSet {
        let threshold = if modality.is_planar() {
            self.config.planar_positive_threshold
        } else {
            self.config.positive_threshold
        };
        rank_predictions(raw.probabilities, threshold, self.config.top_k)
    }

    async fn predict_planar_with_retry(
        &self,
        tensor: &crate::volume::PlanarTensor,
        modality: Modality,
    ) -> Result<PredictionSet, String> {
        let mut last_error = String::new();
        for attempt in 1..=INFERENCE_ATTEMPTS {
            match self.inference.predict_planar(tensor, modality).await {
                Ok(set) => return Ok(set),
                Err(e) => {
                    warn!(attempt, error = %e, "Planar inference attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(format!("Inference failed: {}", last_error))
    }

    async fn predict_volume_with_retry(
        &self,
        volume: &crate::volume::Volume,
        modality: Modality,
    ) -> Result<PredictionSet, String> {
        let mut last_error = String::new();
        for attempt in 1..=INFERENCE_ATTEMPTS {
            match self.inference.predict_volume(volume, modality).await {
                Ok(set) => return Ok(set),
                Err(e) => {
                    warn!(attempt, error = %e, "Volume inference attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(format!("Inference failed: {}", last_error))
    }

    /// Apply the configured stage timeout to a future. `Err` carries the
    /// reason string for the `Failed` terminal.
    async fn bounded<T>(&self, fut: impl std::future::Future<Output = T>) -> Result<T, String> {
        match self.config.stage_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), fut)
                .await
                .map_err(|_| format!("Stage exceeded {}s timeout", secs)),
            None => Ok(fut.await),
        }
    }

    fn check_cancelled(
        &self,
        study: &Study,
        state: &PipelineState,
        next: Stage,
    ) -> Option<ResultEnvelope> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => {
                Some(self.failed(study, state, format!("Cancelled before {}", next)))
            }
            _ => None,
        }
    }

    // ---- Terminal envelopes ---------------------------------------------

    fn completed(&self, study: &Study, state: &PipelineState) -> ResultEnvelope {
        info!(
            study_id = %study.study_id,
            findings = state.predictions.len(),
            urgency = ?state.urgency,
            "Study completed"
        );
        ResultEnvelope {
            status: StudyStatus::Completed,
            study_id: study.study_id,
            modality: state.relevance.as_ref().map(|r| r.modality),
            patient: state.metadata.clone(),
            findings: state.predictions.iter().map(FindingSet::from).collect(),
            recommendations: state.recommendation_text.clone(),
            urgency: state.urgency,
            reason: None,
        }
    }

    fn rejected(&self, study: &Study, state: &PipelineState, reason: String) -> ResultEnvelope {
        info!(study_id = %study.study_id, reason = %reason, "Study rejected");
        ResultEnvelope {
            status: StudyStatus::Rejected,
            study_id: study.study_id,
            modality: state.relevance.as_ref().map(|r| r.modality),
            patient: state.metadata.clone(),
            findings: Vec::new(),
            recommendations: None,
            urgency: None,
            reason: Some(reason),
        }
    }

    fn failed(&self, study: &Study, state: &PipelineState, reason: String) -> ResultEnvelope {
        warn!(study_id = %study.study_id, reason = %reason, "Study failed");
        ResultEnvelope {
            status: StudyStatus::Failed,
            study_id: study.study_id,
            modality: state.relevance.as_ref().map(|r| r.modality),
            patient: state.metadata.clone(),
            findings: state.predictions.iter().map(FindingSet::from).collect(),
            recommendations: None,
            urgency: None,
            reason: Some(reason),
        }
    }

    // ---- Events ---------------------------------------------------------

    async fn stage_started(&self, study_id: Uuid, stage: Stage) {
        debug!(study_id = %study_id, stage = %stage, "Stage started");
        self.emit(PipelineEvent::StageStarted {
            study_id,
            stage: stage.name().to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn stage_completed(&self, study_id: Uuid, stage: Stage) {
        self.emit(PipelineEvent::StageCompleted {
            study_id,
            stage: stage.name().to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        FallbackRecommender, InferenceError, Recommendation, RecommendationError,
    };
    use crate::types::{DecodeError, DecodedSlice, SliceHeader, SlicePosition};
    use crate::volume::PlanarTensor;
    use crate::volume::Volume;
    use async_trait::async_trait;
    use radaid_common::types::{DetectedModality, Urgency};

    // ---- Fixtures -------------------------------------------------------

    #[derive(Default)]
    struct FixtureDecoder {
        entries: HashMap<String, (SliceHeader, DecodedSlice)>,
        header_only: HashMap<String, SliceHeader>,
    }

    impl FixtureDecoder {
        fn insert(&mut self, name: &str, header: SliceHeader, slice: DecodedSlice) {
            self.entries.insert(name.to_string(), (header, slice));
        }

        /// Header reads succeed, pixel decodes fail
        fn insert_header_only(&mut self, name: &str, header: SliceHeader) {
            self.header_only.insert(name.to_string(), header);
        }
    }

    impl SliceDecoder for FixtureDecoder {
        fn read_header(&self, locator: &SliceLocator) -> Result<SliceHeader, DecodeError> {
            self.entries
                .get(locator.as_str())
                .map(|(h, _)| h.clone())
                .or_else(|| self.header_only.get(locator.as_str()).cloned())
                .ok_or_else(|| DecodeError::Unreadable {
                    locator: locator.clone(),
                    reason: "missing fixture".to_string(),
                })
        }

        fn decode(&self, locator: &SliceLocator) -> Result<DecodedSlice, DecodeError> {
            if let Some((_, slice)) = self.entries.get(locator.as_str()) {
                return Ok(slice.clone());
            }
            if self.header_only.contains_key(locator.as_str()) {
                return Err(DecodeError::NoPixelData {
                    locator: locator.clone(),
                });
            }
            Err(DecodeError::Unreadable {
                locator: locator.clone(),
                reason: "missing fixture".to_string(),
            })
        }
    }

    fn header(modality: &str, series: Option<&str>) -> SliceHeader {
        SliceHeader {
            modality: Some(modality.to_string()),
            series_uid: series.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    fn gradient_slice(z: f32) -> DecodedSlice {
        let pixels: Vec<f32> = (0..16).map(|i| i as f32 * 10.0).collect();
        let mut slice = DecodedSlice::new(4, 4, pixels).unwrap();
        slice.position = SlicePosition {
            patient_z: Some(z),
            slice_location: None,
            instance_number: None,
        };
        slice
    }

    fn small_config() -> TriageConfig {
        let mut config = TriageConfig::default();
        config.target_size = 8;
        config.target_depth = 4;
        config
    }

    fn cr_study(count: usize) -> (FixtureDecoder, Vec<SliceLocator>) {
        let mut decoder = FixtureDecoder::default();
        let mut locators = Vec::new();
        for i in 0..count {
            let name = format!("cr-{i}.dcm");
            decoder.insert(&name, header("CR", None), gradient_slice(i as f32));
            locators.push(SliceLocator::new(name));
        }
        (decoder, locators)
    }

    fn ct_study(count: usize) -> (FixtureDecoder, Vec<SliceLocator>) {
        let mut decoder = FixtureDecoder::default();
        let mut locators = Vec::new();
        for i in 0..count {
            let name = format!("ct-{i}.dcm");
            decoder.insert(&name, header("CT", Some("1.2.3")), gradient_slice(i as f32));
            locators.push(SliceLocator::new(name));
        }
        (decoder, locators)
    }

    struct StaticInference {
        probabilities: HashMap<String, f32>,
    }

    impl StaticInference {
        fn new(pairs: &[(&str, f32)]) -> Self {
            Self {
                probabilities: pairs
                    .iter()
                    .map(|(label, prob)| (label.to_string(), *prob))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl InferenceService for StaticInference {
        async fn predict_planar(
            &self,
            _tensor: &PlanarTensor,
            _modality: Modality,
        ) -> Result<PredictionSet, InferenceError> {
            Ok(PredictionSet {
                probabilities: self.probabilities.clone(),
                ..Default::default()
            })
        }

        async fn predict_volume(
            &self,
            _volume: &Volume,
            _modality: Modality,
        ) -> Result<PredictionSet, InferenceError> {
            Ok(PredictionSet {
                probabilities: self.probabilities.clone(),
                ..Default::default()
            })
        }
    }

    struct FailingInference;

    #[async_trait]
    impl InferenceService for FailingInference {
        async fn predict_planar(
            &self,
            _tensor: &PlanarTensor,
            _modality: Modality,
        ) -> Result<PredictionSet, InferenceError> {
            Err(InferenceError::Unavailable("model not loaded".to_string()))
        }

        async fn predict_volume(
            &self,
            _volume: &Volume,
            _modality: Modality,
        ) -> Result<PredictionSet, InferenceError> {
            Err(InferenceError::Unavailable("model not loaded".to_string()))
        }
    }

    struct FailingRecommender;

    #[async_trait]
    impl RecommendationService for FailingRecommender {
        async fn generate(
            &self,
            _findings: &[String],
            _probabilities: &HashMap<String, f32>,
        ) -> Result<Recommendation, RecommendationError> {
            Err(RecommendationError::Unavailable("llm offline".to_string()))
        }
    }

    fn orchestrator(
        decoder: FixtureDecoder,
        inference: impl InferenceService + 'static,
    ) -> Orchestrator {
        Orchestrator::new(
            small_config(),
            Arc::new(decoder),
            Arc::new(inference),
            Arc::new(FallbackRecommender),
        )
    }

    // ---- Routing and terminals ------------------------------------------

    #[tokio::test]
    async fn test_planar_study_completes_per_slice() {
        let (decoder, locators) = cr_study(3);
        let orch = orchestrator(decoder, StaticInference::new(&[("Pneumonia", 0.9)]));

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        assert_eq!(envelope.findings.len(), 3);
        assert_eq!(
            envelope.modality,
            Some(DetectedModality::Single(Modality::Cr))
        );
        assert!(envelope
            .findings
            .iter()
            .all(|set| set.positive_findings == ["Pneumonia"]));
        assert!(envelope.recommendations.is_some());
        assert_eq!(envelope.urgency, Some(Urgency::Unknown));
        assert!(envelope.reason.is_none());
    }

    #[tokio::test]
    async fn test_volumetric_study_completes_once() {
        let (decoder, locators) = ct_study(6);
        let orch = orchestrator(decoder, StaticInference::new(&[("Nodule", 0.8)]));

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        assert_eq!(envelope.findings.len(), 1);
        assert_eq!(
            envelope.modality,
            Some(DetectedModality::Single(Modality::Ct))
        );
    }

    #[tokio::test]
    async fn test_mixed_modality_rejected() {
        let mut decoder = FixtureDecoder::default();
        decoder.insert("a.dcm", header("CT", Some("1")), gradient_slice(0.0));
        decoder.insert("b.dcm", header("MR", Some("1")), gradient_slice(1.0));
        let orch = orchestrator(decoder, StaticInference::new(&[]));

        let envelope = orch
            .run(Study::new(vec!["a.dcm".into(), "b.dcm".into()]))
            .await;

        assert_eq!(envelope.status, StudyStatus::Rejected);
        assert_eq!(envelope.modality, Some(DetectedModality::Mixed));
        assert!(envelope.reason.is_some());
        assert!(envelope.findings.is_empty());
    }

    #[tokio::test]
    async fn test_short_ct_series_rejected_by_guardrail() {
        let (decoder, locators) = ct_study(3);
        let orch = orchestrator(decoder, StaticInference::new(&[("Nodule", 0.8)]));

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Rejected);
        let reason = envelope.reason.unwrap();
        assert!(reason.contains("Insufficient slices"), "reason: {reason}");
        assert!(reason.contains("Got 3"), "reason: {reason}");
    }

    #[tokio::test]
    async fn test_inference_exhaustion_fails_study() {
        let (decoder, locators) = cr_study(2);
        let orch = orchestrator(decoder, FailingInference);

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Failed);
        let reason = envelope.reason.unwrap();
        assert!(reason.contains("Inference failed"), "reason: {reason}");
        assert!(reason.contains("model not loaded"), "reason: {reason}");
    }

    #[tokio::test]
    async fn test_recommendation_failure_degrades_to_fallback() {
        let (decoder, locators) = cr_study(1);
        let orch = Orchestrator::new(
            small_config(),
            Arc::new(decoder),
            Arc::new(StaticInference::new(&[("Effusion", 0.7)])),
            Arc::new(FailingRecommender),
        );

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        let text = envelope.recommendations.unwrap();
        assert!(text.contains("FINDINGS:"));
        assert!(text.contains("Effusion"));
        assert!(text.contains("Automated guidance unavailable"));
        assert_eq!(envelope.urgency, Some(Urgency::Unknown));
    }

    #[tokio::test]
    async fn test_no_findings_skips_recommendation() {
        let (decoder, locators) = cr_study(2);
        let orch = orchestrator(decoder, StaticInference::new(&[]));

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        assert!(envelope.recommendations.is_none());
        assert!(envelope.urgency.is_none());
        assert_eq!(envelope.findings.len(), 2);
    }

    #[tokio::test]
    async fn test_subthreshold_findings_use_top_ranked_fallback() {
        let (decoder, locators) = cr_study(1);
        let orch = orchestrator(
            decoder,
            StaticInference::new(&[("Atelectasis", 0.3), ("Cardiomegaly", 0.2)]),
        );

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        let text = envelope.recommendations.unwrap();
        assert!(text.contains("Atelectasis"));
        assert!(text.contains("Cardiomegaly"));
    }

    #[tokio::test]
    async fn test_configured_thresholds_apply_per_modality() {
        // Default thresholds: 0.65 planar, 0.5 volumetric. A 0.6
        // probability is positive only on the volumetric path.
        let (decoder, locators) = cr_study(1);
        let orch = orchestrator(decoder, StaticInference::new(&[("Consolidation", 0.6)]));
        let envelope = orch.run(Study::new(locators)).await;
        assert_eq!(envelope.status, StudyStatus::Completed);
        assert!(envelope.findings[0].positive_findings.is_empty());

        let (decoder, locators) = ct_study(6);
        let orch = orchestrator(decoder, StaticInference::new(&[("Consolidation", 0.6)]));
        let envelope = orch.run(Study::new(locators)).await;
        assert_eq!(envelope.status, StudyStatus::Completed);
        assert_eq!(envelope.findings[0].positive_findings, ["Consolidation"]);
    }

    #[tokio::test]
    async fn test_configured_top_k_bounds_ranked_predictions() {
        let (decoder, locators) = ct_study(6);
        let labels: Vec<(String, f32)> = (0..8)
            .map(|i| (format!("label-{i}"), 0.1 + i as f32 * 0.05))
            .collect();
        let pairs: Vec<(&str, f32)> = labels.iter().map(|(l, p)| (l.as_str(), *p)).collect();
        let orch = orchestrator(decoder, StaticInference::new(&pairs));

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Completed);
        // Default top_k is 5; the highest-probability label ranks first
        assert_eq!(envelope.findings[0].top_predictions.len(), 5);
        assert_eq!(envelope.findings[0].top_predictions[0].0, "label-7");
    }

    #[tokio::test]
    async fn test_zero_dimension_slice_fails_planar_study() {
        let mut decoder = FixtureDecoder::default();
        decoder.insert("a.dcm", header("CR", None), gradient_slice(0.0));
        decoder.insert(
            "b.dcm",
            header("CR", None),
            DecodedSlice::new(0, 0, vec![]).unwrap(),
        );
        let orch = orchestrator(decoder, StaticInference::new(&[("Pneumonia", 0.9)]));

        let envelope = orch
            .run(Study::new(vec!["a.dcm".into(), "b.dcm".into()]))
            .await;

        assert_eq!(envelope.status, StudyStatus::Failed);
        let reason = envelope.reason.unwrap();
        assert!(reason.contains("b.dcm"), "reason: {reason}");
        assert!(reason.contains("no pixel data"), "reason: {reason}");
    }

    #[tokio::test]
    async fn test_cancellation_fails_before_processing() {
        let (decoder, locators) = cr_study(2);
        let token = CancellationToken::new();
        token.cancel();
        let orch = orchestrator(decoder, StaticInference::new(&[("Pneumonia", 0.9)]))
            .with_cancellation(token);

        let envelope = orch.run(Study::new(locators)).await;

        assert_eq!(envelope.status, StudyStatus::Failed);
        assert!(envelope.reason.unwrap().contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let (decoder, locators) = cr_study(2);
        let (tx, mut rx) = mpsc::channel(64);
        let orch =
            orchestrator(decoder, StaticInference::new(&[("Pneumonia", 0.9)])).with_events(tx);

        let envelope = orch.run(Study::new(locators)).await;
        assert_eq!(envelope.status, StudyStatus::Completed);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.study_id(), envelope.study_id);
            events.push(event);
        }
        assert!(matches!(events.first(), Some(PipelineEvent::StudyStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::StudyCompleted { finding_count: 2, .. })
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::StageStarted { stage, .. } if stage == "PlanarInference")));
    }

    #[tokio::test]
    async fn test_decode_failure_during_planar_build_fails_study() {
        let mut decoder = FixtureDecoder::default();
        decoder.insert("a.dcm", header("CR", None), gradient_slice(0.0));
        decoder.insert_header_only("b.dcm", header("CR", None));
        let orch = orchestrator(decoder, StaticInference::new(&[("Pneumonia", 0.9)]));

        let envelope = orch
            .run(Study::new(vec!["a.dcm".into(), "b.dcm".into()]))
            .await;

        assert_eq!(envelope.status, StudyStatus::Failed);
        let reason = envelope.reason.unwrap();
        assert!(reason.contains("b.dcm"), "reason: {reason}");
        assert!(reason.contains("no pixel data"), "reason: {reason}");
    }
}
