//! Small image filters and automatic thresholds on `ndarray` images.
//!
//! Convolutions go through `imageproc::filter` on `Luma<f32>` buffers. All
//! neighborhood operations replicate the border pixel.

use image::{ImageBuffer, Luma};
use imageproc::filter::{filter3x3, separable_filter, separable_filter_equal};
use ndarray::Array2;

use crate::types::ThresholdMethod;

const HIST_BINS: usize = 256;

/// Normalized 1D Gaussian of `size` taps.
///
/// A non-positive `sigma` is derived from the size the same way OpenCV does.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let size = size.max(1);
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };

    let c = (size / 2) as f32;
    let mut k: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - c;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    for v in &mut k {
        *v /= sum;
    }
    k
}

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

fn to_luma(src: &Array2<f32>) -> GrayF32 {
    let (h, w) = src.dim();
    ImageBuffer::from_fn(w as u32, h as u32, |x, y| Luma([src[[y as usize, x as usize]]]))
}

fn from_luma(img: &GrayF32) -> Array2<f32> {
    let (w, h) = img.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| img.get_pixel(x as u32, y as u32)[0])
}

/// Separable convolution: `kx` along rows, then `ky` along columns.
pub fn convolve_separable(src: &Array2<f32>, kx: &[f32], ky: &[f32]) -> Array2<f32> {
    if src.is_empty() {
        return src.clone();
    }
    from_luma(&separable_filter(&to_luma(src), kx, ky))
}

pub fn gaussian_blur(src: &Array2<f32>, size: usize, sigma: f32) -> Array2<f32> {
    if size <= 1 || src.is_empty() {
        return src.clone();
    }
    let k = gaussian_kernel(size, sigma);
    from_luma(&separable_filter_equal(&to_luma(src), &k))
}

/// Correlate with a 3x3 row-major kernel.
pub fn correlate3x3(src: &Array2<f32>, kernel: &[f32; 9]) -> Array2<f32> {
    if src.is_empty() {
        return src.clone();
    }
    let out: GrayF32 = filter3x3(&to_luma(src), &kernel[..]);
    from_luma(&out)
}

/// Correlate with a 2x2 row-major kernel anchored at its top-left tap.
///
/// `imageproc` kernels anchor at `size / 2`, which for a 2x2 kernel is the
/// bottom-right tap and would shift the Roberts response by one pixel.
pub fn correlate2x2(src: &Array2<f32>, kernel: &[f32; 4]) -> Array2<f32> {
    let (h, w) = src.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let y1 = (y + 1).min(h - 1);
        let x1 = (x + 1).min(w - 1);
        kernel[0] * src[[y, x]]
            + kernel[1] * src[[y, x1]]
            + kernel[2] * src[[y1, x]]
            + kernel[3] * src[[y1, x1]]
    })
}

/// Unweighted mean over an odd `block` x `block` window.
pub fn box_mean(src: &Array2<f32>, block: usize) -> Array2<f32> {
    let block = block.max(1);
    let k = vec![1.0 / block as f32; block];
    convolve_separable(src, &k, &k)
}

/// 256-bin histogram of values in `[0, 1]`.
pub fn unit_histogram<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> [u64; HIST_BINS] {
    let mut hist = [0u64; HIST_BINS];
    for &v in values {
        let bin = (v.clamp(0.0, 1.0) * (HIST_BINS - 1) as f32).round() as usize;
        hist[bin] += 1;
    }
    hist
}

#[inline]
fn bin_value(bin: usize) -> f32 {
    bin as f32 / (HIST_BINS - 1) as f32
}

/// Threshold maximizing between-class variance. Foreground is `v > t`.
pub fn otsu_threshold(hist: &[u64; HIST_BINS]) -> f32 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut best_bin = 0usize;
    let mut best_var = -1.0f64;
    let mut w0 = 0.0f64;
    let mut sum0 = 0.0f64;

    for (i, &c) in hist.iter().enumerate().take(HIST_BINS - 1) {
        w0 += c as f64;
        sum0 += i as f64 * c as f64;
        let w1 = total as f64 - w0;
        if w0 == 0.0 || w1 == 0.0 {
            continue;
        }
        let m0 = sum0 / w0;
        let m1 = (sum_all - sum0) / w1;
        let between = w0 * w1 * (m0 - m1) * (m0 - m1);
        if between > best_var {
            best_var = between;
            best_bin = i;
        }
    }

    bin_value(best_bin)
}

/// Triangle method: the bin farthest from the line joining the histogram peak
/// to the far end of the longer tail. Foreground is `v > t`.
pub fn triangle_threshold(hist: &[u64; HIST_BINS]) -> f32 {
    let first = hist.iter().position(|&c| c > 0);
    let last = hist.iter().rposition(|&c| c > 0);
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) if f < l => (f, l),
        (Some(f), _) => return bin_value(f),
        _ => return 0.0,
    };

    let mut peak = first;
    for i in first..=last {
        if hist[i] > hist[peak] {
            peak = i;
        }
    }

    // Walk towards the longer tail.
    let flip = peak - first > last - peak;
    let (start, end) = if flip { (last, peak) } else { (peak, last) };
    let (lo, hi) = if start < end { (start, end) } else { (end, start) };

    let (x0, y0) = (start as f64, hist[start] as f64);
    let (x1, y1) = (end as f64, hist[end] as f64);
    let dx = x1 - x0;
    let dy = y1 - y0;
    let norm = (dx * dx + dy * dy).sqrt();
    if norm == 0.0 {
        return bin_value(peak);
    }

    let mut best = lo;
    let mut best_dist = -1.0f64;
    for i in lo..=hi {
        let d = (dy * i as f64 - dx * hist[i] as f64 + x1 * y0 - y1 * x0).abs() / norm;
        if d > best_dist {
            best_dist = d;
            best = i;
        }
    }

    bin_value(best)
}

pub fn auto_threshold(hist: &[u64; HIST_BINS], method: ThresholdMethod) -> f32 {
    match method {
        ThresholdMethod::Otsu => otsu_threshold(hist),
        ThresholdMethod::Triangle => triangle_threshold(hist),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_normalized_and_symmetric() {
        let k = gaussian_kernel(5, 1.0);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((k[0] - k[4]).abs() < 1e-7);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }

    #[test]
    fn test_blur_keeps_flat_image() {
        let src = Array2::from_elem((6, 7), 0.4f32);
        let out = gaussian_blur(&src, 3, 2.0);
        assert!(out.iter().all(|&v| (v - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_box_mean_matches_direct_sum() {
        let src = Array2::from_shape_fn((5, 5), |(y, x)| (y * 5 + x) as f32);
        let out = box_mean(&src, 3);
        // Interior pixel: plain 3x3 average.
        let direct: f32 = (1..4)
            .flat_map(|y| (1..4).map(move |x| (y * 5 + x) as f32))
            .sum::<f32>()
            / 9.0;
        assert!((out[[2, 2]] - direct).abs() < 1e-4);
        // Corner pixel replicates the border.
        let corner = (0.0 * 4.0 + 1.0 * 2.0 + 5.0 * 2.0 + 6.0) / 9.0;
        assert!((out[[0, 0]] - corner).abs() < 1e-4);
    }

    #[test]
    fn test_correlate3x3_replicates_border() {
        let src = Array2::from_shape_fn((5, 5), |(y, x)| (y * 5 + x) as f32);
        let kernel = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
        let out = correlate3x3(&src, &kernel);
        assert!((out[[2, 2]] - 8.0).abs() < 1e-4);
        // Left column sees itself as its left neighbour.
        assert!((out[[0, 0]] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_correlate2x2_anchors_top_left() {
        let src = Array2::from_shape_fn((4, 6), |(_, x)| if x < 3 { 0.0 } else { 10.0 });
        let out = correlate2x2(&src, &[1.0, 0.0, 0.0, -1.0]);
        assert_eq!(out[[0, 1]], 0.0);
        assert_eq!(out[[0, 2]], -10.0);
        assert_eq!(out[[0, 3]], 0.0);
        assert_eq!(out[[3, 5]], 0.0);
    }

    #[test]
    fn test_filters_accept_empty_images() {
        let empty = Array2::<f32>::zeros((0, 0));
        assert!(gaussian_blur(&empty, 3, 1.0).is_empty());
        assert!(box_mean(&empty, 3).is_empty());
        assert!(correlate3x3(&empty, &[0.0; 9]).is_empty());
    }

    fn bimodal() -> [u64; 256] {
        let mut hist = [0u64; 256];
        for i in 40..60 {
            hist[i] = 100;
        }
        for i in 180..200 {
            hist[i] = 60;
        }
        hist
    }

    #[test]
    fn test_otsu_splits_bimodal_histogram() {
        let t = otsu_threshold(&bimodal());
        assert!(t >= 59.0 / 255.0 && t < 180.0 / 255.0, "t = {}", t);
    }

    #[test]
    fn test_triangle_sits_on_peak_flank() {
        let mut hist = [0u64; 256];
        hist[20] = 1000;
        for i in 21..200 {
            hist[i] = (1000 / (i - 19)) as u64;
        }
        let t = triangle_threshold(&hist);
        assert!(t > 20.0 / 255.0 && t < 120.0 / 255.0, "t = {}", t);
    }

    #[test]
    fn test_thresholds_on_empty_or_single_bin() {
        let empty = [0u64; 256];
        assert_eq!(otsu_threshold(&empty), 0.0);
        let mut single = [0u64; 256];
        single[128] = 10;
        assert_eq!(triangle_threshold(&single), bin_value(128));
    }
}
