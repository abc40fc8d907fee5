//! Volume construction
//!
//! Turns decoded pixel grids into normalized, fixed-shape tensors with
//! modality-appropriate intensity semantics. The 2D path normalizes each
//! slice independently; the 3D path orders, stacks, windows/percentile-
//! normalizes, and resamples a whole series into one volume.

pub mod planar;
pub mod resample;
pub mod volumetric;

pub use planar::PlanarTensor;

use radaid_common::types::{Modality, WindowPreset, WindowSpec};
use radaid_common::TriageConfig;
use thiserror::Error;

use crate::intake::WindowHint;
use crate::types::{DecodeError, SliceDecoder, SliceLocator};

/// Volume construction errors. A failing slice aborts the whole build and
/// names the file that failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VolumeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No slices supplied for volume construction")]
    EmptyStudy,
}

/// Caller overrides for one volume build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeOptions {
    /// Named CT window preset; outranks all detection but not `custom_window`
    pub ct_window: Option<WindowPreset>,
    /// Explicit (center, width); highest priority
    pub custom_window: Option<(f32, f32)>,
    /// MRI clipping percentiles (low, high)
    pub mri_percentiles: Option<(f32, f32)>,
    /// Target (depth, size) overriding the configured shape
    pub target: Option<(usize, usize)>,
}

/// Dense normalized 3D grid of shape `(depth, height, width)`, laid out
/// row-major. Logically a `(1, 1, D, H, W)` tensor (unit batch and channel
/// dimensions). Built once per study; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    depth: usize,
    height: usize,
    width: usize,
    voxels: Vec<f32>,
    modality: Modality,
    window_used: Option<WindowSpec>,
}

impl Volume {
    /// Shape-checked constructor
    pub(crate) fn new(
        depth: usize,
        height: usize,
        width: usize,
        voxels: Vec<f32>,
        modality: Modality,
        window_used: Option<WindowSpec>,
    ) -> Self {
        assert_eq!(
            voxels.len(),
            depth * height * width,
            "voxel buffer does not match volume shape"
        );
        Self {
            depth,
            height,
            width,
            voxels,
            modality,
            window_used,
        }
    }

    /// `(depth, height, width)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }

    /// Full logical tensor shape including unit batch/channel dims
    pub fn tensor_shape(&self) -> [usize; 5] {
        [1, 1, self.depth, self.height, self.width]
    }

    pub fn voxel(&self, d: usize, y: usize, x: usize) -> f32 {
        self.voxels[(d * self.height + y) * self.width + x]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.voxels
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// The window actually applied (CT only), for reproducibility
    pub fn window_used(&self) -> Option<WindowSpec> {
        self.window_used
    }
}

/// Builds planar batches and volumes from decoded slices
pub struct VolumeBuilder {
    config: TriageConfig,
}

impl VolumeBuilder {
    pub fn new(config: TriageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// 2D path: one independently normalized tensor per slice
    pub fn build_planar_batch(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
    ) -> Result<Vec<PlanarTensor>, VolumeError> {
        planar::build_planar_batch(decoder, locators, self.config.target_size)
    }

    /// 3D path: ordered, windowed, resampled volume
    pub fn build_volume(
        &self,
        decoder: &dyn SliceDecoder,
        locators: &[SliceLocator],
        hint: &WindowHint,
        options: &VolumeOptions,
    ) -> Result<Volume, VolumeError> {
        volumetric::build_volume(decoder, locators, hint, options, &self.config)
    }
}
