//! Series intake validation
//!
//! Decides, from slice headers alone, whether a set of locators is
//! analyzable and under which modality. Nothing here decodes pixels, and
//! nothing here returns `Err` to the caller: unreadable files, missing
//! tags, and mixed series all surface as not-relevant verdicts with a
//! reason string (fail closed, failure as data).

use radaid_common::types::{DetectedModality, Modality, PatientMetadata, WindowPreset};
use radaid_common::TriageConfig;
use tracing::{debug, warn};

use crate::types::{SliceDecoder, SliceHeader, SliceLocator};

/// Modality consensus verdict for one study
#[derive(Debug, Clone, PartialEq)]
pub struct ModalityRelevance {
    pub is_relevant: bool,
    pub modality: DetectedModality,
    /// Populated when the verdict came from a read failure rather than a
    /// genuine modality mix
    pub error: Option<String>,
}

impl ModalityRelevance {
    fn rejected(error: Option<String>) -> Self {
        Self {
            is_relevant: false,
            modality: DetectedModality::Mixed,
            error,
        }
    }
}

/// Volumetric series guardrail verdict
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailVerdict {
    pub is_relevant: bool,
    pub stop_reason: Option<String>,
    pub slice_count: usize,
}

/// Ranked window suggestion for CT studies
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHint {
    /// (center, width) embedded in the DICOM header, first value of
    /// multi-valued encodings
    pub embedded: Option<(f32, f32)>,
    /// BodyPartExamined, uppercased
    pub body_part: Option<String>,
    /// Preset to use when no embedded window is present
    pub suggested: WindowPreset,
    /// True when `suggested` came from the body-part table or description
    /// keywords rather than the configured default
    pub inferred: bool,
    /// Combined study/series description
    pub description: String,
}

/// Metadata-only validator for one study's slice set
pub struct IntakeValidator {
    config: TriageConfig,
}

impl IntakeValidator {
    pub fn new(config: TriageConfig) -> Self {
        Self { config }
    }

    /// Check that every slice carries the same, allow-listed modality tag.
    ///
    /// Fails closed: any unreadable header, any missing modality tag, or
    /// more than one distinct tag value yields a `Mixed`, not-relevant
    /// verdict. A single consistent modality is relevant only if its tag
    /// text is on the configured allow-list.
    pub fn check_modality_relevance(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
    ) -> ModalityRelevance {
        if locators.is_empty() {
            return ModalityRelevance::rejected(Some("No slices supplied".to_string()));
        }

        let mut tags: Vec<String> = Vec::with_capacity(locators.len());
        for locator in locators {
            let header = match decoder.read_header(locator) {
                Ok(h) => h,
                Err(e) => {
                    warn!(locator = %locator, error = %e, "Header read failed during modality check");
                    return ModalityRelevance::rejected(Some(format!("Error reading DICOM: {}", e)));
                }
            };
            match header.modality {
                Some(tag) => tags.push(tag.trim().to_ascii_uppercase()),
                None => {
                    return ModalityRelevance::rejected(Some(format!(
                        "Missing modality tag in {}",
                        locator
                    )))
                }
            }
        }

        let mut unique = tags;
        unique.sort();
        unique.dedup();
        if unique.len() != 1 {
            debug!(?unique, "Mixed modality study rejected");
            return ModalityRelevance::rejected(None);
        }

        let tag = &unique[0];
        if !self.config.is_approved_modality(tag) {
            debug!(modality = %tag, "Modality not on allow-list");
            return ModalityRelevance {
                is_relevant: false,
                modality: DetectedModality::Single(Modality::parse(tag)),
                error: Some(format!("Modality {} is not supported for analysis", tag)),
            };
        }

        ModalityRelevance {
            is_relevant: true,
            modality: DetectedModality::Single(Modality::parse(tag)),
            error: None,
        }
    }

    /// Read descriptive patient fields from the first slice only.
    ///
    /// Never fails: every missing field (and an unreadable header) defaults
    /// to the `"unknown"` sentinel.
    pub fn extract_metadata(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
    ) -> PatientMetadata {
        let header = locators
            .first()
            .and_then(|loc| decoder.read_header(loc).ok())
            .unwrap_or_default();

        let field = |v: Option<String>| {
            v.filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| radaid_common::types::UNKNOWN_FIELD.to_string())
        };

        PatientMetadata {
            patient_name: field(header.patient_name),
            diagnosis: field(header.diagnosis),
            patient_age: field(header.patient_age),
            study_id: field(header.study_id),
        }
    }

    /// Inspect the first slice's header for CT windowing hints.
    ///
    /// Priority of the suggestion: body-part table, then description
    /// keywords, then the configured default preset. The embedded window
    /// (when both center and width are present) is reported separately and
    /// outranks the suggestion during volume construction.
    pub fn extract_window_hint(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
    ) -> WindowHint {
        let header = locators
            .first()
            .and_then(|loc| decoder.read_header(loc).ok())
            .unwrap_or_default();
        self.window_hint_from_header(&header)
    }

    fn window_hint_from_header(&self, header: &SliceHeader) -> WindowHint {
        // Multi-valued window encodings: first value wins
        let embedded = match (header.window_center.first(), header.window_width.first()) {
            (Some(&c), Some(&w)) => Some((c, w)),
            _ => None,
        };

        let body_part = header
            .body_part
            .as_ref()
            .map(|b| b.trim().to_ascii_uppercase())
            .filter(|b| !b.is_empty());

        let description = format!(
            "{} {}",
            header.study_description.as_deref().unwrap_or(""),
            header.series_description.as_deref().unwrap_or("")
        )
        .trim()
        .to_string();

        let inferred_preset = body_part
            .as_deref()
            .and_then(WindowPreset::for_body_part)
            .or_else(|| WindowPreset::for_description(&description));
        let inferred = inferred_preset.is_some();
        let suggested = inferred_preset.unwrap_or_else(|| self.default_preset());

        WindowHint {
            embedded,
            body_part,
            suggested,
            inferred,
            description,
        }
    }

    /// Enforce volumetric-series preconditions: a minimum slice count and
    /// one shared, non-null SeriesInstanceUID across all slices.
    pub fn guardrail(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
    ) -> GuardrailVerdict {
        let slice_count = locators.len();
        let min = self.config.min_volume_slices;

        if slice_count < min {
            return GuardrailVerdict {
                is_relevant: false,
                stop_reason: Some(format!(
                    "Insufficient slices for 3D analysis. Got {}, need at least {}.",
                    slice_count, min
                )),
                slice_count,
            };
        }

        let mut series_uids: Vec<Option<String>> = Vec::with_capacity(slice_count);
        for locator in locators {
            match decoder.read_header(locator) {
                Ok(header) => series_uids.push(header.series_uid),
                Err(e) => {
                    return GuardrailVerdict {
                        is_relevant: false,
                        stop_reason: Some(format!("Error reading DICOM metadata: {}", e)),
                        slice_count,
                    }
                }
            }
        }

        if series_uids.iter().any(|uid| uid.is_none()) {
            return GuardrailVerdict {
                is_relevant: false,
                stop_reason: Some(
                    "Missing SeriesInstanceUID in one or more DICOM files.".to_string(),
                ),
                slice_count,
            };
        }

        let mut unique: Vec<&String> = series_uids.iter().flatten().collect();
        unique.sort();
        unique.dedup();
        if unique.len() != 1 {
            return GuardrailVerdict {
                is_relevant: false,
                stop_reason: Some(format!(
                    "Multiple series detected ({}). Please upload slices from a single series.",
                    unique.len()
                )),
                slice_count,
            };
        }

        GuardrailVerdict {
            is_relevant: true,
            stop_reason: None,
            slice_count,
        }
    }

    /// Configured fallback preset, tolerating a bad config value
    pub fn default_preset(&self) -> WindowPreset {
        WindowPreset::from_name(&self.config.default_ct_window).unwrap_or_else(|| {
            warn!(
                configured = %self.config.default_ct_window,
                "Unknown default_ct_window, falling back to soft_tissue"
            );
            WindowPreset::SoftTissue
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
