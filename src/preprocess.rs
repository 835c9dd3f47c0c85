use image::GrayImage;
use ndarray::Array2;

use crate::engine::EngineError;
use crate::filters::gaussian_blur;
use crate::image_impl::gray_to_array;
use crate::types::DetectionParameters;

/// Output of [`Preprocessor::run`].
#[derive(Clone, Debug)]
pub struct Preprocessed {
    /// Unequalized 8-bit luma, used by the adaptive threshold.
    pub raw: Array2<u8>,
    /// CLAHE-equalized, blurred intensity in `[0, 1]`.
    pub intensity: Array2<f32>,
}

impl Preprocessed {
    pub fn dim(&self) -> (usize, usize) {
        self.raw.dim()
    }

    /// Intensity rescaled to the 8-bit range, for the gradient detectors.
    pub fn intensity_u8(&self) -> Array2<u8> {
        self.intensity
            .mapv(|v| (v.clamp(0.0, 1.0) * 255.0) as u8)
    }
}

pub struct Preprocessor {
    pub clip_limit: f32,
    pub tile_grid: u32,
    pub sigma: f32,
    pub kernel_size: u32,
}

impl Preprocessor {
    pub fn new(clip_limit: f32, tile_grid: u32, sigma: f32, kernel_size: u32) -> Self {
        Self {
            clip_limit,
            tile_grid,
            sigma,
            kernel_size,
        }
    }

    pub fn from_params(params: &DetectionParameters) -> Self {
        Self::new(
            params.clahe_clip_limit,
            params.clahe_tile_grid,
            params.gaussian_sigma,
            params.blur_kernel_size,
        )
    }

    pub fn run(&self, gray: &GrayImage) -> Result<Preprocessed, EngineError> {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Err(EngineError::InvalidFrame(format!(
                "cannot preprocess a {}x{} image",
                w, h
            )));
        }

        let raw = gray_to_array(gray);
        let equalized = clahe(&raw, self.clip_limit, self.tile_grid);
        let scaled = equalized.mapv(|v| v as f32 / 255.0);
        let intensity = gaussian_blur(&scaled, self.kernel_size as usize, self.sigma);

        Ok(Preprocessed { raw, intensity })
    }
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into at most `grid` x `grid` tiles. Each tile histogram
/// is clipped at `clip_limit * tile_area / 256` with the excess spread evenly,
/// and pixels interpolate bilinearly between the four nearest tile LUTs.
pub fn clahe(src: &Array2<u8>, clip_limit: f32, grid: u32) -> Array2<u8> {
    let (h, w) = src.dim();
    if h == 0 || w == 0 {
        return src.clone();
    }

    let (tiles_y, tile_h) = tile_layout(h, grid as usize);
    let (tiles_x, tile_w) = tile_layout(w, grid as usize);

    let mut luts = vec![[0u8; 256]; tiles_y * tiles_x];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let y0 = ty * tile_h;
            let x0 = tx * tile_w;
            let y1 = (y0 + tile_h).min(h);
            let x1 = (x0 + tile_w).min(w);

            let mut hist = [0usize; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src[[y, x]] as usize] += 1;
                }
            }
            let area = (y1 - y0) * (x1 - x0);
            luts[ty * tiles_x + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let mut out = Array2::<u8>::zeros((h, w));
    for y in 0..h {
        let (ty0, ty1, wy) = tile_neighbors(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, wx) = tile_neighbors(x, tile_w, tiles_x);
            let v = src[[y, x]] as usize;

            let tl = luts[ty0 * tiles_x + tx0][v] as f32;
            let tr = luts[ty0 * tiles_x + tx1][v] as f32;
            let bl = luts[ty1 * tiles_x + tx0][v] as f32;
            let br = luts[ty1 * tiles_x + tx1][v] as f32;

            let top = tl + (tr - tl) * wx;
            let bottom = bl + (br - bl) * wx;
            out[[y, x]] = (top + (bottom - top) * wy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn tile_layout(len: usize, grid: usize) -> (usize, usize) {
    let grid = grid.clamp(1, len);
    let tile = len.div_ceil(grid);
    (len.div_ceil(tile), tile)
}

/// Lower/upper tile index around pixel `i` and the weight of the upper one.
fn tile_neighbors(i: usize, tile: usize, tiles: usize) -> (usize, usize, f32) {
    let f = (i as f32 + 0.5) / tile as f32 - 0.5;
    let lo = f.floor();
    let weight = f - lo;
    let last = tiles as isize - 1;
    let i0 = (lo as isize).clamp(0, last) as usize;
    let i1 = (lo as isize + 1).clamp(0, last) as usize;
    (i0, i1, weight)
}

fn tile_lut(hist: &mut [usize; 256], area: usize, clip_limit: f32) -> [u8; 256] {
    let clip = ((clip_limit * area as f32 / 256.0) as usize).max(1);

    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for count in hist.iter_mut() {
        *count += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        let mut bin = 0;
        while bin < 256 && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0usize;
    for (v, count) in hist.iter().enumerate() {
        cdf += count;
        lut[v] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_run_rejects_empty_image() {
        let p = Preprocessor::from_params(&DetectionParameters::default());
        let empty = GrayImage::new(0, 5);
        assert!(matches!(p.run(&empty), Err(EngineError::InvalidFrame(_))));
    }

    #[test]
    fn test_clahe_keeps_flat_image_flat() {
        let src = Array2::from_elem((40, 40), 90u8);
        let out = clahe(&src, 2.0, 8);
        let first = out[[0, 0]];
        assert!(out.iter().all(|&v| v == first));
    }

    #[test]
    fn test_clahe_is_monotonic_within_a_tile() {
        // Single tile: the mapping is one LUT and must preserve order.
        let src = Array2::from_shape_fn((16, 16), |(y, x)| (y * 16 + x) as u8);
        let out = clahe(&src, 4.0, 1);
        let flat: Vec<u8> = out.iter().copied().collect();
        assert!(flat.windows(2).all(|p| p[0] <= p[1]));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let src = Array2::from_shape_fn((32, 32), |(_, x)| 100 + (x / 8) as u8);
        let out = clahe(&src, 40.0, 1);
        let lo = *out.iter().min().unwrap_or(&0);
        let hi = *out.iter().max().unwrap_or(&0);
        assert!(hi - lo > 3 * 3, "range {}..{}", lo, hi);
    }

    #[test]
    fn test_run_outputs_unit_intensity_and_raw() {
        let img = GrayImage::from_fn(20, 12, |x, _| Luma([(x * 10) as u8]));
        let p = Preprocessor::from_params(&DetectionParameters::default());
        let out = p.run(&img).unwrap();
        assert_eq!(out.dim(), (12, 20));
        assert_eq!(out.raw[[3, 7]], 70);
        assert!(out.intensity.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
