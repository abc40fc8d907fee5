//! Core types and the pixel decode boundary
//!
//! The pipeline never parses DICOM files itself. Concrete file formats live
//! behind [`SliceDecoder`]: header reads for the intake checks (no pixel
//! decode), full decodes for volume construction. Everything the numeric
//! pipeline needs from a slice is captured in [`SliceHeader`] and
//! [`DecodedSlice`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Opaque reference to one encoded image slice (path or URI).
/// Immutable; provided by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceLocator(String);

impl SliceLocator {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SliceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SliceLocator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Decode failures reported by the slice decoder.
///
/// Non-retryable for the same file without remediation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Corrupt file or unreadable header
    #[error("Cannot read slice {locator}: {reason}")]
    Unreadable { locator: SliceLocator, reason: String },

    /// Header declares no pixel data present
    #[error("DICOM file has no pixel data: {locator}")]
    NoPixelData { locator: SliceLocator },
}

/// Header-only view of one slice; no pixels decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceHeader {
    /// Modality tag text, exactly as stored (e.g. "CT")
    pub modality: Option<String>,
    /// SeriesInstanceUID
    pub series_uid: Option<String>,
    /// BodyPartExamined
    pub body_part: Option<String>,
    /// StudyDescription
    pub study_description: Option<String>,
    /// SeriesDescription
    pub series_description: Option<String>,
    /// WindowCenter; multi-valued encodings carry all values in order
    pub window_center: Vec<f32>,
    /// WindowWidth; multi-valued encodings carry all values in order
    pub window_width: Vec<f32>,
    pub patient_name: Option<String>,
    pub diagnosis: Option<String>,
    pub patient_age: Option<String>,
    pub study_id: Option<String>,
}

/// Ordering hints for one slice, in fallback priority order.
///
/// The ordering key prefers the patient-position z coordinate along the
/// slice normal, then SliceLocation, then InstanceNumber, then arrival
/// order. This chain is a stable, testable contract.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlicePosition {
    /// ImagePositionPatient z component
    pub patient_z: Option<f32>,
    /// SliceLocation
    pub slice_location: Option<f32>,
    /// InstanceNumber
    pub instance_number: Option<f32>,
}

impl SlicePosition {
    /// Resolve the ordering key, falling back to the arrival index
    pub fn key(&self, arrival_index: usize) -> f32 {
        self.patient_z
            .or(self.slice_location)
            .or(self.instance_number)
            .unwrap_or(arrival_index as f32)
    }
}

/// One decoded pixel grid plus the fields needed to interpret it.
/// Immutable once produced by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSlice {
    pub rows: usize,
    pub cols: usize,
    /// Raw stored values, row-major, length rows*cols
    pub pixels: Vec<f32>,
    /// RescaleSlope (1.0 when absent)
    pub rescale_slope: f32,
    /// RescaleIntercept (0.0 when absent)
    pub rescale_intercept: f32,
    /// True for MONOCHROME1 (inverted monochrome encoding)
    pub photometric_inversion: bool,
    pub position: SlicePosition,
}

impl DecodedSlice {
    /// Shape-checked constructor
    pub fn new(rows: usize, cols: usize, pixels: Vec<f32>) -> Result<Self, String> {
        if pixels.len() != rows * cols {
            return Err(format!(
                "pixel buffer length {} does not match {}x{}",
                pixels.len(),
                rows,
                cols
            ));
        }
        Ok(Self {
            rows,
            cols,
            pixels,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            photometric_inversion: false,
            position: SlicePosition::default(),
        })
    }
}

/// Abstract "decode one slice" capability.
///
/// `read_header` must not touch pixel data; the intake checks are defined
/// to work from headers alone.
pub trait SliceDecoder: Send + Sync {
    fn read_header(&self, locator: &SliceLocator) -> Result<SliceHeader, DecodeError>;
    fn decode(&self, locator: &SliceLocator) -> Result<DecodedSlice, DecodeError>;
}

/// One inference output: full probability map, thresholded positive
/// findings, and the ranked top-k list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionSet {
    /// Label name -> probability in [0, 1]
    pub probabilities: HashMap<String, f32>,
    /// Labels at or above the positivity threshold, rank order
    pub positive_findings: Vec<String>,
    /// Top-k (label, probability) pairs, descending
    pub top_predictions: Vec<(String, f32)>,
}

// ============================================================================
// Tests
// ============================================================================
