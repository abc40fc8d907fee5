//! Numeric primitives for volume construction
//!
//! Percentile with linearly interpolated rank, bilinear spatial resize with
//! half-pixel centers, and 1D linear depth resampling. All pure functions
//! over row-major `f32` buffers.

/// Percentile of `values` with linear interpolation between ranks.
///
/// `p` in [0, 100]. Matches the conventional linear method: the rank is
/// `p/100 * (n-1)` over the sorted data, interpolating between the two
/// surrounding order statistics.
pub fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (p.clamp(0.0, 100.0) as f64 / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = (rank - lo as f64) as f32;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Resize one row-major 2D grid to `(out_h, out_w)` with bilinear
/// interpolation, sampling at half-pixel centers and clamping at the edges.
pub fn resize_bilinear(
    src: &[f32],
    rows: usize,
    cols: usize,
    out_h: usize,
    out_w: usize,
) -> Vec<f32> {
    debug_assert_eq!(src.len(), rows * cols);
    if rows == out_h && cols == out_w {
        return src.to_vec();
    }
    // Nothing to sample from an empty grid
    if rows == 0 || cols == 0 {
        return vec![0.0f32; out_h * out_w];
    }

    let mut out = vec![0.0f32; out_h * out_w];
    let scale_y = rows as f32 / out_h as f32;
    let scale_x = cols as f32 / out_w as f32;

    for oy in 0..out_h {
        // Source coordinate of this output pixel's center
        let sy = ((oy as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (rows - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(rows - 1);
        let fy = sy - y0 as f32;

        for ox in 0..out_w {
            let sx = ((ox as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (cols - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(cols - 1);
            let fx = sx - x0 as f32;

            let top = src[y0 * cols + x0] * (1.0 - fx) + src[y0 * cols + x1] * fx;
            let bottom = src[y1 * cols + x0] * (1.0 - fx) + src[y1 * cols + x1] * fx;
            out[oy * out_w + ox] = top * (1.0 - fy) + bottom * fy;
        }
    }
    out
}

/// Resample a `(depth, plane)` stack along the depth axis to
/// `target_depth` by evaluating 1D linear interpolation at evenly spaced
/// positions spanning `[0, depth-1]`.
///
/// Identity (exact copy) when `depth == target_depth`. Between two real
/// slices every per-voxel profile is a convex combination, so constant and
/// monotonic profiles stay constant and monotonic.
pub fn resample_depth(voxels: &[f32], depth: usize, plane: usize, target_depth: usize) -> Vec<f32> {
    debug_assert_eq!(voxels.len(), depth * plane);
    if depth == target_depth {
        return voxels.to_vec();
    }
    // Nothing to interpolate from an empty stack
    if depth == 0 || plane == 0 {
        return vec![0.0f32; target_depth * plane];
    }

    let mut out = vec![0.0f32; target_depth * plane];
    for k in 0..target_depth {
        // Evenly spaced sample positions over the original depth range
        let t = if target_depth == 1 {
            0.0
        } else {
            k as f64 * (depth - 1) as f64 / (target_depth - 1) as f64
        };
        let lo = t.floor() as usize;
        let hi = (lo + 1).min(depth - 1);
        let frac = (t - lo as f64) as f32;

        let dst = &mut out[k * plane..(k + 1) * plane];
        let a = &voxels[lo * plane..(lo + 1) * plane];
        let b = &voxels[hi * plane..(hi + 1) * plane];
        for ((d, &va), &vb) in dst.iter_mut().zip(a).zip(b) {
            *d = va * (1.0 - frac) + vb * frac;
        }
    }
    out
}

/// Clip to `[lo, hi]` then rescale linearly to `[0, 1]`.
/// Degenerate range (`hi <= lo`) maps everything to zero.
pub fn clip_rescale(values: &mut [f32], lo: f32, hi: f32) {
    if hi > lo {
        let span = hi - lo;
        for v in values.iter_mut() {
            *v = ((*v).clamp(lo, hi) - lo) / span;
        }
    } else {
        values.fill(0.0);
    }
}

// ============================================================================
// Tests
// ============================================================================
