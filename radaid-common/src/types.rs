//! Core imaging domain types
//!
//! Modality tags, CT window presets, window provenance, and urgency levels.
//! Preset center/width pairs and the body-part lookup table follow standard
//! radiology display windows.

use serde::{Deserialize, Serialize};

/// Imaging modality of a DICOM slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// Computed Radiography (planar X-ray)
    Cr,
    /// Digital Radiography (planar X-ray)
    Dx,
    /// Computed Tomography (volumetric)
    Ct,
    /// Magnetic Resonance (volumetric)
    Mr,
    /// Any other modality tag value
    Other,
}

impl Modality {
    /// Parse a DICOM Modality tag value.
    ///
    /// Comparison is exact on the uppercased tag text ("CR", "DX", "CT",
    /// "MR"). Vendor-specific equivalents are not recognized and map to
    /// `Other`, which downstream falls back to min-max normalization.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_uppercase().as_str() {
            "CR" => Modality::Cr,
            "DX" => Modality::Dx,
            "CT" => Modality::Ct,
            "MR" => Modality::Mr,
            _ => Modality::Other,
        }
    }

    /// Canonical tag text
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Cr => "CR",
            Modality::Dx => "DX",
            Modality::Ct => "CT",
            Modality::Mr => "MR",
            Modality::Other => "OTHER",
        }
    }

    /// True for planar X-ray modalities (CR, DX)
    pub fn is_planar(&self) -> bool {
        matches!(self, Modality::Cr | Modality::Dx)
    }

    /// True for volumetric modalities (CT, MR)
    pub fn is_volumetric(&self) -> bool {
        matches!(self, Modality::Ct | Modality::Mr)
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modality consensus across one study's slices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectedModality {
    /// Every slice carried the same modality tag
    Single(Modality),
    /// Differing or missing modality tags across slices
    Mixed,
}

impl std::fmt::Display for DetectedModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectedModality::Single(m) => m.fmt(f),
            DetectedModality::Mixed => f.write_str("MIXED"),
        }
    }
}

/// Named CT window preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPreset {
    Lung,
    Bone,
    SoftTissue,
    Brain,
    Liver,
    Mediastinum,
    Abdomen,
}

impl WindowPreset {
    /// (center, width) in Hounsfield Units
    pub fn center_width(&self) -> (f32, f32) {
        match self {
            WindowPreset::Lung => (-600.0, 1500.0),
            WindowPreset::Bone => (400.0, 1800.0),
            WindowPreset::SoftTissue => (40.0, 400.0),
            WindowPreset::Brain => (40.0, 80.0),
            WindowPreset::Liver => (60.0, 150.0),
            WindowPreset::Mediastinum => (40.0, 350.0),
            WindowPreset::Abdomen => (40.0, 400.0),
        }
    }

    /// Preset name used in configuration and logs
    pub fn name(&self) -> &'static str {
        match self {
            WindowPreset::Lung => "lung",
            WindowPreset::Bone => "bone",
            WindowPreset::SoftTissue => "soft_tissue",
            WindowPreset::Brain => "brain",
            WindowPreset::Liver => "liver",
            WindowPreset::Mediastinum => "mediastinum",
            WindowPreset::Abdomen => "abdomen",
        }
    }

    /// Look up a preset by configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lung" => Some(WindowPreset::Lung),
            "bone" => Some(WindowPreset::Bone),
            "soft_tissue" => Some(WindowPreset::SoftTissue),
            "brain" => Some(WindowPreset::Brain),
            "liver" => Some(WindowPreset::Liver),
            "mediastinum" => Some(WindowPreset::Mediastinum),
            "abdomen" => Some(WindowPreset::Abdomen),
            _ => None,
        }
    }

    /// Map a DICOM BodyPartExamined value to its default window.
    ///
    /// Input is expected uppercased/trimmed; unmatched body parts return
    /// `None` so the caller can fall through to description keywords.
    pub fn for_body_part(body_part: &str) -> Option<Self> {
        match body_part {
            "CHEST" | "LUNG" | "THORAX" => Some(WindowPreset::Lung),
            "HEAD" | "BRAIN" => Some(WindowPreset::Brain),
            "SKULL" | "SPINE" | "CSPINE" | "TSPINE" | "LSPINE" | "EXTREMITY" | "LEG" | "ARM"
            | "HAND" | "FOOT" | "KNEE" | "HIP" | "SHOULDER" => Some(WindowPreset::Bone),
            "PELVIS" => Some(WindowPreset::SoftTissue),
            "ABDOMEN" | "KIDNEY" => Some(WindowPreset::Abdomen),
            "LIVER" => Some(WindowPreset::Liver),
            _ => None,
        }
    }

    /// Infer a preset from free-text study/series description keywords.
    ///
    /// Secondary fallback when the structured body-part tag is absent.
    pub fn for_description(description: &str) -> Option<Self> {
        let desc = description.to_ascii_uppercase();
        let has = |kws: &[&str]| kws.iter().any(|kw| desc.contains(kw));
        if has(&["LUNG", "CHEST", "THORAX", "PULMONARY"]) {
            Some(WindowPreset::Lung)
        } else if has(&["BRAIN", "HEAD", "CRANIAL"]) {
            Some(WindowPreset::Brain)
        } else if has(&["BONE", "SPINE", "SKELETAL", "FRACTURE"]) {
            Some(WindowPreset::Bone)
        } else if has(&["LIVER", "HEPATIC"]) {
            Some(WindowPreset::Liver)
        } else if has(&["ABDOMEN", "ABDOMINAL"]) {
            Some(WindowPreset::Abdomen)
        } else {
            None
        }
    }
}

/// Provenance of the window applied to a CT volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    /// WindowCenter/WindowWidth stored in the DICOM header
    DicomEmbedded,
    /// Inferred from BodyPartExamined or description keywords
    BodyPartInferred,
    /// Caller-supplied preset name
    ExplicitPreset,
    /// Caller-supplied (center, width) pair
    Custom,
    /// Configured safe default
    Default,
}

/// The window actually applied to a volume. Immutable once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub center: f32,
    pub width: f32,
    pub source: WindowSource,
}

impl WindowSpec {
    pub fn new(center: f32, width: f32, source: WindowSource) -> Self {
        Self {
            center,
            width,
            source,
        }
    }

    /// Build a spec from a named preset
    pub fn from_preset(preset: WindowPreset, source: WindowSource) -> Self {
        let (center, width) = preset.center_width();
        Self {
            center,
            width,
            source,
        }
    }
}

/// Clinical urgency classification of a finding set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    Routine,
    SemiUrgent,
    Urgent,
    Emergent,
    /// Recommendation collaborator unavailable or degraded
    Unknown,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Routine => "routine",
            Urgency::SemiUrgent => "semi-urgent",
            Urgency::Urgent => "urgent",
            Urgency::Emergent => "emergent",
            Urgency::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "routine" => Urgency::Routine,
            "semi-urgent" | "semi_urgent" => Urgency::SemiUrgent,
            "urgent" => Urgency::Urgent,
            "emergent" => Urgency::Emergent,
            _ => Urgency::Unknown,
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel for descriptive fields absent from the DICOM header
pub const UNKNOWN_FIELD: &str = "unknown";

/// Descriptive patient fields read from the first slice of a study.
///
/// Missing fields default to the `"unknown"` sentinel instead of failing;
/// these values are pass-through for reporting, never used for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientMetadata {
    pub patient_name: String,
    pub diagnosis: String,
    pub patient_age: String,
    pub study_id: String,
}

impl Default for PatientMetadata {
    fn default() -> Self {
        Self {
            patient_name: UNKNOWN_FIELD.to_string(),
            diagnosis: UNKNOWN_FIELD.to_string(),
            patient_age: UNKNOWN_FIELD.to_string(),
            study_id: UNKNOWN_FIELD.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
