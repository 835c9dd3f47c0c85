//! Foreground/edge mask from several independent boundary detectors.

use imageproc::edges::canny;
use log::debug;
use ndarray::{Array2, Zip};

use crate::filters::{
    auto_threshold, box_mean, correlate2x2, correlate3x3, gaussian_blur, unit_histogram,
};
use crate::image_impl::array_to_gray;
use crate::morphology::{closing, disk, erode};
use crate::preprocess::Preprocessed;
use crate::types::{DetectionParameters, ThresholdMethod};

const PREWITT_X: [f32; 9] = [-1.0, 0.0, 1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0];
const PREWITT_Y: [f32; 9] = [-1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
const SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];
const ROBERTS_X: [f32; 4] = [1.0, 0.0, 0.0, -1.0];
const ROBERTS_Y: [f32; 4] = [0.0, 1.0, -1.0, 0.0];

/// Kirsch compass kernels, one per 45°, starting North.
const KIRSCH: [[f32; 9]; 8] = [
    [5.0, 5.0, 5.0, -3.0, 0.0, -3.0, -3.0, -3.0, -3.0],
    [5.0, 5.0, -3.0, 5.0, 0.0, -3.0, -3.0, -3.0, -3.0],
    [5.0, -3.0, -3.0, 5.0, 0.0, -3.0, 5.0, -3.0, -3.0],
    [-3.0, -3.0, -3.0, 5.0, 0.0, -3.0, 5.0, 5.0, -3.0],
    [-3.0, -3.0, -3.0, -3.0, 0.0, -3.0, 5.0, 5.0, 5.0],
    [-3.0, -3.0, -3.0, -3.0, 0.0, 5.0, -3.0, 5.0, 5.0],
    [-3.0, -3.0, 5.0, -3.0, 0.0, 5.0, -3.0, -3.0, 5.0],
    [-3.0, 5.0, 5.0, -3.0, 0.0, 5.0, -3.0, -3.0, -3.0],
];

/// Per-detector masks, kept separate so callers can inspect them.
#[derive(Clone, Debug)]
pub struct EdgeMasks {
    pub adaptive: Array2<bool>,
    pub canny: Array2<bool>,
    pub gradient: Array2<bool>,
    pub compass: Array2<bool>,
}

impl EdgeMasks {
    pub fn fused(&self) -> Array2<bool> {
        let mut out = self.adaptive.clone();
        Zip::from(&mut out)
            .and(&self.canny)
            .and(&self.gradient)
            .and(&self.compass)
            .for_each(|o, &c, &g, &k| *o = *o || c || g || k);
        out
    }
}

pub struct EdgeFusion {
    pub adaptive_block_size: u32,
    pub adaptive_offset: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub edge_threshold: f32,
    pub threshold_method: ThresholdMethod,
    pub compass_min_contrast: f32,
}

impl EdgeFusion {
    pub fn from_params(params: &DetectionParameters) -> Self {
        Self {
            adaptive_block_size: params.adaptive_block_size,
            adaptive_offset: params.adaptive_offset,
            canny_low: params.canny_low,
            canny_high: params.canny_high,
            edge_threshold: params.edge_threshold,
            threshold_method: params.threshold_method,
            compass_min_contrast: params.compass_min_contrast,
        }
    }

    pub fn run(&self, pre: &Preprocessed) -> EdgeMasks {
        let img8 = pre.intensity_u8();
        let masks = EdgeMasks {
            adaptive: self.adaptive_mask(&pre.raw),
            canny: self.canny_mask(&img8),
            gradient: self.gradient_mask(&img8),
            compass: self.compass_mask(&pre.intensity),
        };

        debug!(
            "edge fusion: adaptive={} canny={} gradient={} compass={}",
            count(&masks.adaptive),
            count(&masks.canny),
            count(&masks.gradient),
            count(&masks.compass)
        );

        masks
    }

    /// Pixels that fail to clear both their box-weighted and their
    /// Gaussian-weighted local mean by `adaptive_offset`.
    pub fn adaptive_mask(&self, raw: &Array2<u8>) -> Array2<bool> {
        let block = self.adaptive_block_size as usize;
        let src = raw.mapv(|v| v as f32);
        let box_local = box_mean(&src, block);
        let gauss_local = gaussian_blur(&src, block, 0.0);

        let mut out = Array2::from_elem(raw.dim(), false);
        Zip::from(&mut out)
            .and(&src)
            .and(&box_local)
            .and(&gauss_local)
            .for_each(|o, &v, &m1, &m2| {
                let bright = v > m1 - self.adaptive_offset || v > m2 - self.adaptive_offset;
                *o = !bright;
            });
        out
    }

    pub fn canny_mask(&self, img8: &Array2<u8>) -> Array2<bool> {
        let edges = canny(&array_to_gray(img8), self.canny_low, self.canny_high);
        let (h, w) = img8.dim();
        Array2::from_shape_fn((h, w), |(y, x)| edges.get_pixel(x as u32, y as u32)[0] > 0)
    }

    /// Prewitt, Sobel and Roberts magnitudes above `edge_threshold`.
    pub fn gradient_mask(&self, img8: &Array2<u8>) -> Array2<bool> {
        let src = img8.mapv(|v| v as f32);
        let t = self.edge_threshold;

        let responses = [
            (correlate3x3(&src, &PREWITT_X), correlate3x3(&src, &PREWITT_Y)),
            (correlate3x3(&src, &SOBEL_X), correlate3x3(&src, &SOBEL_Y)),
            (correlate2x2(&src, &ROBERTS_X), correlate2x2(&src, &ROBERTS_Y)),
        ];

        let mut out = Array2::from_elem(img8.dim(), false);
        for (gx, gy) in &responses {
            Zip::from(&mut out)
                .and(gx)
                .and(gy)
                .for_each(|o, &a, &b| *o = *o || (a * a + b * b).sqrt() > t);
        }
        out
    }

    /// Union of the eight Kirsch directions, each binarized on its own.
    pub fn compass_mask(&self, intensity: &Array2<f32>) -> Array2<bool> {
        let mut union = Array2::from_elem(intensity.dim(), false);

        for kernel in KIRSCH.iter() {
            let response = correlate3x3(intensity, kernel).mapv(f32::abs);
            if let Some(mask) = self.binarize_direction(&response) {
                Zip::from(&mut union)
                    .and(&mask)
                    .for_each(|u, &m| *u = *u || m);
            }
        }

        let se = disk(1);
        closing(&erode(&union, &se), 1)
    }

    fn binarize_direction(&self, response: &Array2<f32>) -> Option<Array2<bool>> {
        let (lo, hi) = response
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let range = hi - lo;
        if range <= self.compass_min_contrast.max(0.0) {
            return None;
        }

        let norm = response.mapv(|v| (v - lo) / range);
        let t = auto_threshold(&unit_histogram(norm.iter()), self.threshold_method);
        Some(norm.mapv(|v| v > t))
    }
}

fn count(mask: &Array2<bool>) -> usize {
    mask.iter().filter(|&&v| v).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Preprocessor;
    use crate::test_utils::{disk_frame, noise_frame};
    use crate::types::BoundingBox;

    fn fusion() -> EdgeFusion {
        EdgeFusion::from_params(&DetectionParameters::default())
    }

    #[test]
    fn test_flat_compass_response_is_skipped() {
        let flat = Array2::from_elem((20, 20), 0.5f32);
        let mask = fusion().compass_mask(&flat);
        assert!(mask.iter().all(|&v| !v));
    }

    #[test]
    fn test_default_keeps_weak_direction() {
        let weak = Array2::from_shape_fn((10, 10), |(_, x)| x as f32 * 0.01);
        let mask = fusion().binarize_direction(&weak).unwrap();
        assert!(mask[[0, 9]] && !mask[[0, 0]]);
    }

    #[test]
    fn test_contrast_gate_is_opt_in() {
        let mut f = fusion();
        f.compass_min_contrast = 0.5;
        let weak = Array2::from_shape_fn((10, 10), |(_, x)| x as f32 * 0.01);
        assert!(f.binarize_direction(&weak).is_none());

        let strong = Array2::from_shape_fn((10, 10), |(_, x)| if x < 5 { 0.0 } else { 2.0 });
        let mask = f.binarize_direction(&strong).unwrap();
        assert!(mask[[0, 7]] && !mask[[0, 1]]);
    }

    #[test]
    fn test_low_contrast_disk_keeps_compass_boundary() {
        let frame = disk_frame(96, 96, &[(48.0, 48.0)], 20.0, 125, 131);
        let pre = Preprocessor::from_params(&DetectionParameters::default())
            .run(&frame.crop_gray(&BoundingBox::new(0, 0, 96, 96)))
            .unwrap();

        let compass = fusion().compass_mask(&pre.intensity);
        assert!(count(&compass) > 0);

        let mut gated = fusion();
        gated.compass_min_contrast = 10.0;
        assert_eq!(count(&gated.compass_mask(&pre.intensity)), 0);
    }

    #[test]
    fn test_adaptive_marks_dark_rim() {
        let raw = Array2::from_shape_fn((30, 30), |(y, x)| {
            if (10..20).contains(&y) && (10..20).contains(&x) {
                40u8
            } else {
                200u8
            }
        });
        let mask = fusion().adaptive_mask(&raw);
        // Dark pixel next to bright surroundings.
        assert!(mask[[10, 10]]);
        // Uniform background.
        assert!(!mask[[0, 0]]);
        assert!(!mask[[25, 25]]);
    }

    #[test]
    fn test_gradient_mask_on_step() {
        let img = Array2::from_shape_fn((8, 8), |(_, x)| if x < 4 { 0u8 } else { 200u8 });
        let mask = fusion().gradient_mask(&img);
        assert!(mask[[4, 3]] || mask[[4, 4]]);
        assert!(!mask[[4, 0]]);
    }

    #[test]
    fn test_faint_noise_has_no_strong_edges() {
        let frame = noise_frame(96, 96, 128, 1, 7);
        let pre = Preprocessor::from_params(&DetectionParameters::default())
            .run(&frame.crop_gray(&BoundingBox::new(0, 0, 96, 96)))
            .unwrap();
        let masks = fusion().run(&pre);
        assert_eq!(count(&masks.adaptive), 0);
        assert_eq!(count(&masks.canny), 0);
        assert_eq!(count(&masks.gradient), 0);
    }

    #[test]
    fn test_disk_frame_produces_ring() {
        let frame = disk_frame(96, 96, &[(48.0, 48.0)], 20.0, 40, 200);
        let pre = Preprocessor::from_params(&DetectionParameters::default())
            .run(&frame.crop_gray(&BoundingBox::new(0, 0, 96, 96)))
            .unwrap();
        let fused = fusion().run(&pre).fused();
        // On the boundary, not in the far background.
        assert!(fused[[48, 28]] || fused[[48, 27]] || fused[[48, 29]]);
        assert!(!fused[[5, 5]]);
    }
}
