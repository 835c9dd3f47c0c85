use std::f64::consts::SQRT_2;

use nalgebra::Matrix2;
use ndarray::Array2;

use crate::contours::is_boundary_pixel;
use crate::types::{BoundingBox, Point2f};

/// Per-region measurements in label-image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMetrics {
    pub label: u32,
    pub area: u32,
    pub perimeter: f32,
    pub eccentricity: f32,
    pub bbox: BoundingBox,
    pub centroid: Point2f,
    /// Centroid weighted by intensity; `None` when the region carries no weight.
    pub weighted_centroid: Option<Point2f>,
    /// First pixel in raster order, `(x, y)`.
    pub first_pixel: (i32, i32),
}

#[derive(Default, Clone)]
struct Accum {
    area: u64,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    sw: f64,
    swx: f64,
    swy: f64,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    first: (usize, usize),
}

/// Measure every region `1..=count` of `labels`.
///
/// Labels that own no pixel are skipped. `intensity` supplies the weights of
/// the weighted centroid.
pub fn region_metrics(
    labels: &Array2<u32>,
    count: u32,
    intensity: Option<&Array2<f32>>,
) -> Vec<RegionMetrics> {
    let (h, w) = labels.dim();
    let n = count as usize + 1;
    let mut acc = vec![Accum::default(); n];

    for y in 0..h {
        for x in 0..w {
            let l = labels[[y, x]] as usize;
            if l == 0 || l >= n {
                continue;
            }
            let a = &mut acc[l];
            if a.area == 0 {
                a.first = (x, y);
                a.min_x = x;
                a.max_x = x;
                a.min_y = y;
                a.max_y = y;
            }
            let (fx, fy) = (x as f64, y as f64);
            a.area += 1;
            a.sx += fx;
            a.sy += fy;
            a.sxx += fx * fx;
            a.syy += fy * fy;
            a.sxy += fx * fy;
            a.min_x = a.min_x.min(x);
            a.max_x = a.max_x.max(x);
            a.min_y = a.min_y.min(y);
            a.max_y = a.max_y.max(y);

            if let Some(img) = intensity {
                let wgt = img[[y, x]].max(0.0) as f64;
                a.sw += wgt;
                a.swx += wgt * fx;
                a.swy += wgt * fy;
            }
        }
    }

    let perimeters = perimeters(labels, count);

    acc.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, a)| a.area > 0)
        .map(|(l, a)| {
            let area = a.area as f64;
            let cx = a.sx / area;
            let cy = a.sy / area;
            let mu20 = a.sxx / area - cx * cx;
            let mu02 = a.syy / area - cy * cy;
            let mu11 = a.sxy / area - cx * cy;

            let weighted_centroid = if a.sw > 0.0 {
                Some(Point2f::new((a.swx / a.sw) as f32, (a.swy / a.sw) as f32))
            } else {
                None
            };

            RegionMetrics {
                label: l as u32,
                area: a.area as u32,
                perimeter: perimeters[l] as f32,
                eccentricity: eccentricity(mu20, mu02, mu11),
                bbox: BoundingBox::new(
                    a.min_x as u32,
                    a.min_y as u32,
                    (a.max_x - a.min_x + 1) as u32,
                    (a.max_y - a.min_y + 1) as u32,
                ),
                centroid: Point2f::new(cx as f32, cy as f32),
                weighted_centroid,
                first_pixel: (a.first.0 as i32, a.first.1 as i32),
            }
        })
        .collect()
}

/// `sqrt(1 - λ2/λ1)` of the second central moment matrix; 0 for a point.
pub fn eccentricity(mu20: f64, mu02: f64, mu11: f64) -> f32 {
    let eig = Matrix2::new(mu20, mu11, mu11, mu02).symmetric_eigenvalues();
    let l1 = eig[0].max(eig[1]);
    let l2 = eig[0].min(eig[1]).max(0.0);
    if l1 <= f64::EPSILON {
        return 0.0;
    }
    (1.0 - l2 / l1).clamp(0.0, 1.0).sqrt() as f32
}

/// Weight of a border pixel given its neighborhood code
/// `1 + 2·(4-neighbors on border) + 10·(diagonal neighbors on border)`.
fn border_weight(code: u32) -> f64 {
    match code {
        5 | 7 | 15 | 17 | 25 | 27 => 1.0,
        21 | 33 => SQRT_2,
        13 | 23 => (1.0 + SQRT_2) / 2.0,
        _ => 0.0,
    }
}

/// 4-connected perimeter estimate per label, indexed by label id.
pub fn perimeters(labels: &Array2<u32>, count: u32) -> Vec<f64> {
    let (h, w) = labels.dim();
    let mut border = Array2::<u32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let l = labels[[y, x]];
            if l != 0 && is_boundary_pixel(labels, x, y, l) {
                border[[y, x]] = l;
            }
        }
    }

    let on_border = |x: isize, y: isize, l: u32| {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && border[[y as usize, x as usize]] == l
    };

    let mut out = vec![0.0f64; count as usize + 1];
    for y in 0..h {
        for x in 0..w {
            let l = border[[y, x]];
            if l == 0 || l as usize >= out.len() {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            let straight = [(0, -1), (1, 0), (0, 1), (-1, 0)]
                .iter()
                .filter(|&&(dx, dy)| on_border(xi + dx, yi + dy, l))
                .count() as u32;
            let diagonal = [(1, -1), (1, 1), (-1, 1), (-1, -1)]
                .iter()
                .filter(|&&(dx, dy)| on_border(xi + dx, yi + dy, l))
                .count() as u32;
            out[l as usize] += border_weight(1 + 2 * straight + 10 * diagonal);
        }
    }
    out
}
