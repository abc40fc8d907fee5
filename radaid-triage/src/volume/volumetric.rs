//! 3D (volumetric) preprocessing path for CT/MR studies
//!
//! Orders slices along the patient axis, applies modality-specific intensity
//! mapping (CT windowing in Hounsfield Units, MRI percentile clipping,
//! min-max for anything else), resamples space and depth to a fixed shape,
//! and standardizes. The `WindowSpec` actually applied is recorded on the
//! emitted [`Volume`] so the exact normalization is reproducible downstream.

use radaid_common::types::{Modality, WindowSource, WindowSpec};
use radaid_common::TriageConfig;
use tracing::{debug, info};

use super::resample::{clip_rescale, percentile, resample_depth, resize_bilinear};
use super::{Volume, VolumeError, VolumeOptions};
use crate::intake::WindowHint;
use crate::types::{DecodeError, DecodedSlice, SliceDecoder, SliceLocator};

/// Affine standardization constants applied after windowing/normalization,
/// mapping `[0, 1]` to `[-1, 1]` (the convention of the downstream 3D
/// models).
pub const STANDARDIZE_MEAN: f32 = 0.5;
pub const STANDARDIZE_STD: f32 = 0.5;

/// Build a normalized `(D, H, W)` volume from a CT/MR slice set.
pub fn build_volume(
    decoder: &dyn SliceDecoder,
    locators: &[SliceLocator],
    hint: &WindowHint,
    options: &VolumeOptions,
    config: &TriageConfig,
) -> Result<Volume, VolumeError> {
    if locators.is_empty() {
        return Err(VolumeError::EmptyStudy);
    }

    let (target_depth, target_size) = options
        .target
        .unwrap_or((config.target_depth, config.target_size));

    // Modality is determined once, from the first slice
    let first_header = decoder.read_header(&locators[0])?;
    let modality = first_header
        .modality
        .as_deref()
        .map(Modality::parse)
        .unwrap_or(Modality::Other);

    // Decode every slice, remembering arrival order for tie-breaking
    let mut slices: Vec<(f32, usize, DecodedSlice)> = Vec::with_capacity(locators.len());
    for (arrival, locator) in locators.iter().enumerate() {
        let slice = decoder.decode(locator)?;
        // A zero-dimension grid is valid at the decoder boundary but has
        // nothing to normalize or resize
        if slice.rows == 0 || slice.cols == 0 {
            return Err(VolumeError::Decode(DecodeError::NoPixelData {
                locator: locator.clone(),
            }));
        }
        let key = slice.position.key(arrival);
        slices.push((key, arrival, slice));
    }

    // Rescale parameters come from the first decoded slice, applied to the
    // whole volume
    let (slope, intercept) = (slices[0].2.rescale_slope, slices[0].2.rescale_intercept);

    // Anatomical order: total order on position key, stable for ties
    slices.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Modality-specific intensity mapping to [0, 1]
    let mut planes: Vec<(usize, usize, Vec<f32>)> = Vec::with_capacity(slices.len());
    let mut window_used: Option<WindowSpec> = None;

    match modality {
        Modality::Ct => {
            let window = select_window(hint, options);
            info!(
                center = window.center,
                width = window.width,
                source = ?window.source,
                "CT window selected"
            );
            let min_hu = window.center - window.width / 2.0;
            let max_hu = window.center + window.width / 2.0;
            for (_, _, slice) in &slices {
                let mut hu: Vec<f32> = slice
                    .pixels
                    .iter()
                    .map(|&v| v * slope + intercept)
                    .collect();
                clip_rescale(&mut hu, min_hu, max_hu);
                planes.push((slice.rows, slice.cols, hu));
            }
            window_used = Some(window);
        }
        Modality::Mr => {
            let (p_low_pct, p_high_pct) = options
                .mri_percentiles
                .unwrap_or((config.mri_lower_percentile, config.mri_upper_percentile));
            // Percentiles over the whole volume, not per slice
            let all: Vec<f32> = slices
                .iter()
                .flat_map(|(_, _, s)| s.pixels.iter().copied())
                .collect();
            let p_low = percentile(&all, p_low_pct);
            let p_high = percentile(&all, p_high_pct);
            debug!(p_low, p_high, "MRI percentile bounds");
            for (_, _, slice) in &slices {
                let mut values = slice.pixels.clone();
                clip_rescale(&mut values, p_low, p_high);
                planes.push((slice.rows, slice.cols, values));
            }
        }
        _ => {
            // Unknown modality: global min-max, all-zero when constant
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for (_, _, slice) in &slices {
                for &v in &slice.pixels {
                    min = min.min(v);
                    max = max.max(v);
                }
            }
            for (_, _, slice) in &slices {
                let mut values = slice.pixels.clone();
                clip_rescale(&mut values, min, max);
                planes.push((slice.rows, slice.cols, values));
            }
        }
    }

    // Spatial resampling: every slice independently to (S, S)
    let plane_len = target_size * target_size;
    let mut stack = Vec::with_capacity(planes.len() * plane_len);
    for (rows, cols, values) in planes {
        stack.extend(resize_bilinear(&values, rows, cols, target_size, target_size));
    }

    // Depth resampling to D (identity when the counts already match)
    let depth_in = slices.len();
    let resampled = resample_depth(&stack, depth_in, plane_len, target_depth);

    // Final standardization, independent of modality
    let voxels: Vec<f32> = resampled
        .into_iter()
        .map(|v| (v - STANDARDIZE_MEAN) / STANDARDIZE_STD)
        .collect();

    debug!(
        modality = %modality,
        depth_in,
        depth_out = target_depth,
        size = target_size,
        "Volume built"
    );

    Ok(Volume::new(
        target_depth,
        target_size,
        target_size,
        voxels,
        modality,
        window_used,
    ))
}

/// Resolve the CT window by priority: caller custom pair > caller preset >
/// DICOM-embedded > body-part/description-inferred > configured default.
fn select_window(hint: &WindowHint, options: &VolumeOptions) -> WindowSpec {
    if let Some((center, width)) = options.custom_window {
        WindowSpec::new(center, width, WindowSource::Custom)
    } else if let Some(preset) = options.ct_window {
        WindowSpec::from_preset(preset, WindowSource::ExplicitPreset)
    } else if let Some((center, width)) = hint.embedded {
        WindowSpec::new(center, width, WindowSource::DicomEmbedded)
    } else if hint.inferred {
        WindowSpec::from_preset(hint.suggested, WindowSource::BodyPartInferred)
    } else {
        WindowSpec::from_preset(hint.suggested, WindowSource::Default)
    }
}

// ============================================================================
// Tests
// ============================================================================
