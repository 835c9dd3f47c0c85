//! Distance-transform seeded watershed for splitting touching objects.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use log::debug;
use ndarray::{Array2, Zip};

use crate::contours::{component_areas, label_components, Connectivity};
use crate::morphology::remove_small_objects;
use crate::types::DetectionParameters;

/// Marker components smaller than this are discarded.
const MIN_MARKER_SIZE: usize = 2;

pub struct WatershedSeparator {
    pub min_area: u32,
    pub distance_threshold: f32,
    pub compactness: f32,
}

impl WatershedSeparator {
    pub fn from_params(params: &DetectionParameters) -> Self {
        Self {
            min_area: params.watershed_min_area,
            distance_threshold: params.watershed_distance_threshold,
            compactness: params.watershed_compactness,
        }
    }

    /// Split large regions of `labels` and return the combined labeling.
    ///
    /// Watershed ids come first, followed by the small regions and any large
    /// region that received no marker, in their original order.
    pub fn run(&self, labels: &Array2<u32>, count: u32) -> (Array2<u32>, u32) {
        let areas = component_areas(labels, count);
        let is_large: Vec<bool> = areas
            .iter()
            .enumerate()
            .map(|(l, &a)| l != 0 && a > self.min_area as usize)
            .collect();

        if !is_large.iter().any(|&v| v) {
            return (labels.clone(), count);
        }

        let large_mask = labels.mapv(|l| is_large[l as usize]);
        let distance = distance_to_background(&large_mask);

        let threshold = self.distance_threshold as f64;
        let mut seeds = large_mask.clone();
        Zip::from(&mut seeds)
            .and(&distance)
            .for_each(|s, &d| *s = *s && d > threshold);
        let seeds = remove_small_objects(&seeds, MIN_MARKER_SIZE);
        let (markers, marker_count) = label_components(&seeds, Connectivity::Eight);

        let surface = distance.mapv(|d| -d);
        let mut out = compact_watershed(&surface, &markers, &large_mask, self.compactness as f64);

        let mut reached = vec![false; count as usize + 1];
        for (&l, &o) in labels.iter().zip(out.iter()) {
            if o != 0 {
                reached[l as usize] = true;
            }
        }

        let mut remap = vec![0u32; count as usize + 1];
        let mut next = marker_count;
        for l in 1..=count as usize {
            if areas[l] > 0 && (!is_large[l] || !reached[l]) {
                next += 1;
                remap[l] = next;
            }
        }

        for (o, &l) in out.iter_mut().zip(labels.iter()) {
            if remap[l as usize] != 0 {
                *o = remap[l as usize];
            }
        }

        debug!(
            "watershed: {} markers, {} labels after separation",
            marker_count, next
        );

        (out, next)
    }
}

/// Euclidean distance from each `true` pixel to the nearest `false` one.
/// Pixels outside the frame count as background.
pub fn distance_to_background(mask: &Array2<bool>) -> Array2<f64> {
    let (h, w) = mask.dim();
    let padded = GrayImage::from_fn(w as u32 + 2, h as u32 + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && (x as usize) <= w && (y as usize) <= h;
        if inside && mask[[y as usize - 1, x as usize - 1]] {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let squared = euclidean_squared_distance_transform(&padded);
    Array2::from_shape_fn((h, w), |(y, x)| {
        squared.get_pixel(x as u32 + 1, y as u32 + 1)[0].sqrt()
    })
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    value: f64,
    age: u64,
    index: usize,
    source: usize,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the lowest value, then the oldest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .total_cmp(&self.value)
            .then_with(|| other.age.cmp(&self.age))
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Marker-controlled compact watershed, 4-connected, restricted to `mask`.
///
/// A pixel's priority is `surface + compactness * |p - seed|`; pixels are
/// labeled when popped, so the first arrival wins.
pub fn compact_watershed(
    surface: &Array2<f64>,
    markers: &Array2<u32>,
    mask: &Array2<bool>,
    compactness: f64,
) -> Array2<u32> {
    let (h, w) = surface.dim();
    let mut output = Array2::<u32>::zeros((h, w));
    let mut heap = BinaryHeap::new();

    for y in 0..h {
        for x in 0..w {
            if markers[[y, x]] != 0 && mask[[y, x]] {
                output[[y, x]] = markers[[y, x]];
                let index = y * w + x;
                heap.push(Pending {
                    value: surface[[y, x]],
                    age: 0,
                    index,
                    source: index,
                });
            }
        }
    }

    let mut age = 0u64;
    while let Some(elem) = heap.pop() {
        let (y, x) = (elem.index / w, elem.index % w);
        let (sy, sx) = (elem.source / w, elem.source % w);

        if elem.index != elem.source {
            if output[[y, x]] != 0 {
                continue;
            }
            output[[y, x]] = output[[sy, sx]];
        }

        for (dx, dy) in [(0isize, -1isize), (1, 0), (0, 1), (-1, 0)] {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if !mask[[ny, nx]] || output[[ny, nx]] != 0 {
                continue;
            }

            let ddx = nx as f64 - sx as f64;
            let ddy = ny as f64 - sy as f64;
            age += 1;
            heap.push(Pending {
                value: surface[[ny, nx]] + compactness * (ddx * ddx + ddy * ddy).sqrt(),
                age,
                index: ny * w + nx,
                source: elem.source,
            });
        }
    }

    output
}
