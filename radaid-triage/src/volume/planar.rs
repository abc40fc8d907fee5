//! 2D (planar) preprocessing path for CR/DX studies
//!
//! Each slice is normalized independently against its own 1st/99th
//! percentile intensity distribution, resized, and replicated to three
//! channels with ImageNet statistics (the convention the downstream planar
//! vision models were trained with). No cross-slice information sharing.

use tracing::debug;

use super::resample::{clip_rescale, percentile, resize_bilinear};
use super::VolumeError;
use crate::types::{DecodeError, DecodedSlice, SliceDecoder, SliceLocator};

/// Channel means expected by the downstream planar model (ImageNet)
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Channel standard deviations expected by the downstream planar model
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Percentiles used for per-slice robust normalization
const SLICE_PERCENTILES: (f32, f32) = (1.0, 99.0);

/// One model-ready planar tensor of shape `(channels, height, width)`,
/// row-major within each channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarTensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl PlanarTensor {
    pub fn get(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }
}

/// Build one independently normalized tensor per input slice.
///
/// Per slice: decode, apply rescale slope/intercept, invert MONOCHROME1
/// encodings, clip to the slice's own 1st/99th percentiles and rescale to
/// `[0, 1]` (coincident percentiles yield an all-zero slice), resize to
/// `(size, size)`, replicate gray to three channels, and apply channel
/// normalization.
pub fn build_planar_batch(
    decoder: &dyn SliceDecoder,
    locators: &[SliceLocator],
    size: usize,
) -> Result<Vec<PlanarTensor>, VolumeError> {
    if locators.is_empty() {
        return Err(VolumeError::EmptyStudy);
    }

    let mut batch = Vec::with_capacity(locators.len());
    for locator in locators {
        let slice = decoder.decode(locator)?;
        // A zero-dimension grid is valid at the decoder boundary but has
        // nothing to normalize or resize
        if slice.rows == 0 || slice.cols == 0 {
            return Err(VolumeError::Decode(DecodeError::NoPixelData {
                locator: locator.clone(),
            }));
        }
        batch.push(prepare_slice(&slice, size));
    }
    debug!(count = batch.len(), size, "Planar batch built");
    Ok(batch)
}

fn prepare_slice(slice: &DecodedSlice, size: usize) -> PlanarTensor {
    // Stored values -> output units
    let mut pixels: Vec<f32> = slice
        .pixels
        .iter()
        .map(|&v| v * slice.rescale_slope + slice.rescale_intercept)
        .collect();

    // MONOCHROME1 stores white-is-low; flip around the slice maximum
    if slice.photometric_inversion {
        let max = pixels.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for v in pixels.iter_mut() {
            *v = max - *v;
        }
    }

    // Robust per-slice normalization
    let p_low = percentile(&pixels, SLICE_PERCENTILES.0);
    let p_high = percentile(&pixels, SLICE_PERCENTILES.1);
    clip_rescale(&mut pixels, p_low, p_high);

    let gray = resize_bilinear(&pixels, slice.rows, slice.cols, size, size);

    // Gray replicated to 3 channels, each normalized to model statistics
    let plane = size * size;
    let mut data = vec![0.0f32; 3 * plane];
    for c in 0..3 {
        let (mean, std) = (CHANNEL_MEAN[c], CHANNEL_STD[c]);
        for (i, &g) in gray.iter().enumerate() {
            data[c * plane + i] = (g - mean) / std;
        }
    }

    PlanarTensor {
        channels: 3,
        height: size,
        width: size,
        data,
    }
}

// ============================================================================
// Tests
// ============================================================================
