//! Registration offset search between a segmentation mask and a second
//! channel (e.g. fluorescence taken through a different light path).

use std::thread;

use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::engine::EngineError;

/// Best offset found by [`OffsetOptimizer::optimize`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OffsetResult {
    /// Mean intensity under the shifted mask.
    pub mean: f64,
    pub total: f64,
    /// Mask pixels that landed inside the image.
    pub area: usize,
    /// Absolute offset `(x, y)` applied to the mask.
    pub offset: (i32, i32),
    /// `offset - base`.
    pub improvement: (i32, i32),
}

impl OffsetResult {
    fn unmatched(base: (i32, i32)) -> Self {
        Self {
            mean: 0.0,
            total: 0.0,
            area: 0,
            offset: base,
            improvement: (0, 0),
        }
    }
}

/// Exhaustive `base ± search_range` search on a fixed worker pool.
pub struct OffsetOptimizer {
    search_range: u32,
    pool: ThreadPool,
}

impl OffsetOptimizer {
    /// Pool sized to the available cores.
    pub fn new(search_range: u32) -> Result<Self, EngineError> {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_threads(search_range, threads)
    }

    pub fn with_threads(search_range: u32, threads: usize) -> Result<Self, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("cellseg-sweep-{}", i))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        Ok(Self { search_range, pool })
    }

    pub fn search_range(&self) -> u32 {
        self.search_range
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Find the mask offset maximizing mean intensity of `image` under it.
    ///
    /// Mask pixel `(x, y)` lands on image pixel `(x + ox, y + oy)`; pixels
    /// shifted out of the image are ignored. The first candidate (dx outer,
    /// dy inner, both ascending) wins ties. If no candidate covers any pixel
    /// the base offset is returned with zero intensity.
    pub fn optimize(&self, image: &Array2<f32>, mask: &Array2<bool>, base: (i32, i32)) -> OffsetResult {
        let pixels: Vec<(i32, i32)> = mask
            .indexed_iter()
            .filter(|&(_, &m)| m)
            .map(|((y, x), _)| (x as i32, y as i32))
            .collect();
        let offsets = candidates(base, self.search_range);

        let scores: Vec<Option<(f64, usize)>> = self.pool.install(|| {
            offsets
                .par_iter()
                .map(|&offset| score(image, &pixels, offset))
                .collect()
        });

        let mut best: Option<OffsetResult> = None;
        for (&offset, scored) in offsets.iter().zip(scores) {
            let Some((total, area)) = scored else {
                continue;
            };
            let mean = total / area as f64;
            if best.map_or(true, |b| mean > b.mean) {
                best = Some(OffsetResult {
                    mean,
                    total,
                    area,
                    offset,
                    improvement: (offset.0 - base.0, offset.1 - base.1),
                });
            }
        }

        debug!("offset sweep evaluated {} candidates", offsets.len());
        match best {
            Some(b) => {
                info!(
                    "best offset ({:+}, {:+}), improvement ({:+}, {:+}), mean {:.2} over {} px",
                    b.offset.0, b.offset.1, b.improvement.0, b.improvement.1, b.mean, b.area
                );
                b
            }
            None => {
                warn!("offset sweep found no overlap between mask and image");
                OffsetResult::unmatched(base)
            }
        }
    }
}

/// Subtract a dark frame, clamping at zero.
pub fn apply_dark_correction(
    image: &Array2<f32>,
    dark: &Array2<f32>,
) -> Result<Array2<f32>, EngineError> {
    if image.dim() != dark.dim() {
        return Err(EngineError::InvalidFrame(format!(
            "dark frame {:?} does not match image {:?}",
            dark.dim(),
            image.dim()
        )));
    }
    Ok((image - dark).mapv(|v| v.max(0.0)))
}

fn candidates(base: (i32, i32), range: u32) -> Vec<(i32, i32)> {
    let r = range as i32;
    (-r..=r)
        .flat_map(|dx| (-r..=r).map(move |dy| (base.0 + dx, base.1 + dy)))
        .collect()
}

fn score(image: &Array2<f32>, pixels: &[(i32, i32)], offset: (i32, i32)) -> Option<(f64, usize)> {
    let (h, w) = image.dim();
    let mut total = 0.0f64;
    let mut area = 0usize;
    for &(x, y) in pixels {
        let tx = x + offset.0;
        let ty = y + offset.1;
        if tx < 0 || ty < 0 || tx as usize >= w || ty as usize >= h {
            continue;
        }
        total += image[[ty as usize, tx as usize]] as f64;
        area += 1;
    }
    (area > 0).then_some((total, area))
}
