//! Binary morphology on `Array2<bool>` masks.

use ndarray::Array2;

use crate::contours::{component_areas, label_components, Connectivity};
use crate::types::DetectionParameters;

/// Offsets `(dx, dy)` of a disk structuring element: `dx² + dy² <= r²`.
///
/// `disk(1)` is the 3x3 cross.
pub fn disk(radius: u32) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut se = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                se.push((dx, dy));
            }
        }
    }
    se
}

/// Out-of-frame pixels count as background.
pub fn dilate(mask: &Array2<bool>, se: &[(isize, isize)]) -> Array2<bool> {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        se.iter().any(|&(dx, dy)| {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h && mask[[ny as usize, nx as usize]]
        })
    })
}

/// Out-of-frame pixels count as foreground.
pub fn erode(mask: &Array2<bool>, se: &[(isize, isize)]) -> Array2<bool> {
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        se.iter().all(|&(dx, dy)| {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h || mask[[ny as usize, nx as usize]]
        })
    })
}

pub fn closing(mask: &Array2<bool>, radius: u32) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let se = disk(radius);
    erode(&dilate(mask, &se), &se)
}

pub fn opening(mask: &Array2<bool>, radius: u32) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let se = disk(radius);
    dilate(&erode(mask, &se), &se)
}

/// Drop 8-connected components with fewer than `min_size` pixels.
pub fn remove_small_objects(mask: &Array2<bool>, min_size: usize) -> Array2<bool> {
    if min_size <= 1 {
        return mask.clone();
    }
    let (labels, n) = label_components(mask, Connectivity::Eight);
    let areas = component_areas(&labels, n);
    labels.mapv(|l| l != 0 && areas[l as usize] >= min_size)
}

/// Fill 4-connected background components that do not touch the frame border
/// and have at most `max_area` pixels.
pub fn fill_small_holes(mask: &Array2<bool>, max_area: usize) -> Array2<bool> {
    let (h, w) = mask.dim();
    if h == 0 || w == 0 {
        return mask.clone();
    }
    let background = mask.mapv(|v| !v);
    let (labels, n) = label_components(&background, Connectivity::Four);
    let areas = component_areas(&labels, n);

    let mut touches_border = vec![false; n as usize + 1];
    for x in 0..w {
        touches_border[labels[[0, x]] as usize] = true;
        touches_border[labels[[h - 1, x]] as usize] = true;
    }
    for y in 0..h {
        touches_border[labels[[y, 0]] as usize] = true;
        touches_border[labels[[y, w - 1]] as usize] = true;
    }

    Array2::from_shape_fn((h, w), |(y, x)| {
        let l = labels[[y, x]] as usize;
        mask[[y, x]] || (!touches_border[l] && areas[l] <= max_area)
    })
}

/// Neighbor weights for the thinning lookup, counter-clockwise from East.
const THIN_WEIGHTS: [(isize, isize, u8); 8] = [
    (1, 0, 1),
    (1, -1, 2),
    (0, -1, 4),
    (-1, -1, 8),
    (-1, 0, 16),
    (-1, 1, 32),
    (0, 1, 64),
    (1, 1, 128),
];

/// Deletion tables for the two Guo-Hall subiterations.
fn thin_luts() -> ([bool; 256], [bool; 256]) {
    let mut first = [false; 256];
    let mut second = [false; 256];

    for (code, (f, s)) in first.iter_mut().zip(second.iter_mut()).enumerate() {
        let p: [bool; 8] = std::array::from_fn(|k| (code >> k) & 1 == 1);

        // Exactly one 8-connected foreground run around the pixel.
        let crossings = (0..4)
            .filter(|&k| !p[2 * k] && (p[2 * k + 1] || p[(2 * k + 2) % 8]))
            .count();
        if crossings != 1 {
            continue;
        }

        let n1 = (0..4).filter(|&k| p[2 * k] || p[2 * k + 1]).count();
        let n2 = (0..4).filter(|&k| p[2 * k + 1] || p[(2 * k + 2) % 8]).count();
        let n = n1.min(n2);
        if !(2..=3).contains(&n) {
            continue;
        }

        let keep_first = (p[1] || p[2] || !p[7]) && p[0];
        let keep_second = (p[5] || p[6] || !p[3]) && p[4];
        *f = !keep_first;
        *s = !keep_second;
    }

    (first, second)
}

fn neighbor_code(mask: &Array2<bool>, x: usize, y: usize) -> u8 {
    let (h, w) = mask.dim();
    let mut code = 0u8;
    for &(dx, dy, weight) in THIN_WEIGHTS.iter() {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h && mask[[ny as usize, nx as usize]] {
            code |= weight;
        }
    }
    code
}

/// One Guo-Hall thinning iteration (two parallel subiterations).
pub fn thin_once(mask: &Array2<bool>) -> Array2<bool> {
    let (h, w) = mask.dim();
    let (first, second) = thin_luts();
    let mut out = mask.clone();

    for lut in [&first, &second] {
        let snapshot = out.clone();
        for y in 0..h {
            for x in 0..w {
                if snapshot[[y, x]] && lut[neighbor_code(&snapshot, x, y) as usize] {
                    out[[y, x]] = false;
                }
            }
        }
    }

    out
}

/// Noise removal and shape cleanup between edge fusion and labeling.
pub struct MorphologicalCleaner {
    pub min_object_size: u32,
    pub closing_radius: u32,
    pub opening_radius: u32,
    pub smoothing_radius: u32,
    pub hole_area_threshold: u32,
}

impl MorphologicalCleaner {
    pub fn from_params(params: &DetectionParameters) -> Self {
        Self {
            min_object_size: params.min_object_size,
            closing_radius: params.closing_radius,
            opening_radius: params.opening_radius,
            smoothing_radius: params.smoothing_radius,
            hole_area_threshold: params.hole_area_threshold,
        }
    }

    pub fn run(&self, mask: &Array2<bool>) -> Array2<bool> {
        let min_size = self.min_object_size as usize;

        let mut m = remove_small_objects(mask, min_size);
        m = closing(&m, self.closing_radius);
        m = opening(&m, self.opening_radius);

        if self.smoothing_radius > 0 {
            m = closing(&m, self.smoothing_radius);
            m = opening(&m, self.smoothing_radius - 1);
        }

        m = fill_small_holes(&m, self.hole_area_threshold as usize);
        m = thin_once(&m);
        remove_small_objects(&m, min_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Array2<bool> {
        let h = rows.len();
        let w = rows[0].len();
        Array2::from_shape_fn((h, w), |(y, x)| rows[y].as_bytes()[x] == b'#')
    }

    fn count(mask: &Array2<bool>) -> usize {
        mask.iter().filter(|&&v| v).count()
    }

    #[test]
    fn test_disk_shapes() {
        assert_eq!(disk(0), vec![(0, 0)]);
        assert_eq!(disk(1).len(), 5);
        assert_eq!(disk(2).len(), 13);
    }

    #[test]
    fn test_dilate_and_erode_borders() {
        let mask = mask_from(&["#..", "...", "..."]);
        let d = dilate(&mask, &disk(1));
        assert_eq!(d, mask_from(&["##.", "#..", "..."]));

        // A full frame survives erosion because the outside counts as foreground.
        let full = Array2::from_elem((4, 4), true);
        assert_eq!(erode(&full, &disk(1)), full);
    }

    #[test]
    fn test_closing_bridges_gap_and_opening_removes_spur() {
        let gap = mask_from(&[
            ".......",
            ".##.##.",
            ".##.##.",
            ".##.##.",
            ".......",
        ]);
        let closed = closing(&gap, 1);
        assert!(closed[[2, 3]]);

        let spur = mask_from(&[
            ".......",
            ".###...",
            ".######",
            ".###...",
            ".......",
        ]);
        let opened = opening(&spur, 1);
        assert!(!opened[[2, 5]] && !opened[[2, 6]]);
        assert!(opened[[2, 2]]);
    }

    #[test]
    fn test_zero_radius_is_identity() {
        let mask = mask_from(&["#.#", ".#.", "#.#"]);
        assert_eq!(closing(&mask, 0), mask);
        assert_eq!(opening(&mask, 0), mask);
    }

    #[test]
    fn test_remove_small_objects_uses_eight_connectivity() {
        let mask = mask_from(&[
            "#.....",
            ".#..##",
            "....##",
        ]);
        let out = remove_small_objects(&mask, 3);
        // The diagonal pair has only 2 pixels.
        assert!(!out[[0, 0]] && !out[[1, 1]]);
        assert_eq!(count(&out), 4);
    }

    #[test]
    fn test_fill_small_holes_respects_area_and_border() {
        let mask = mask_from(&[
            "#####...",
            "#..##...",
            "#..##...",
            "#####...",
        ]);
        let filled = fill_small_holes(&mask, 4);
        assert!(filled[[1, 1]] && filled[[2, 2]]);
        // Background touching the border stays.
        assert!(!filled[[0, 7]]);

        let kept = fill_small_holes(&mask, 3);
        assert!(!kept[[1, 1]]);
    }

    #[test]
    fn test_thin_once_strips_a_layer() {
        let block = Array2::from_shape_fn((9, 9), |(y, x)| (2..7).contains(&y) && (2..7).contains(&x));
        let thinned = thin_once(&block);
        assert!(count(&thinned) < count(&block));
        // The center survives one iteration.
        assert!(thinned[[4, 4]]);
        // Thinning never adds pixels.
        assert!(thinned.iter().zip(block.iter()).all(|(&t, &b)| !t || b));
    }

    #[test]
    fn test_thin_once_keeps_one_pixel_line() {
        let line = mask_from(&[".......", ".#####.", "......."]);
        let thinned = thin_once(&line);
        // Interior line pixels are not simple points.
        assert!(thinned[[1, 2]] && thinned[[1, 3]] && thinned[[1, 4]]);
    }

    #[test]
    fn test_cleaner_removes_specks_and_fills_disk() {
        let mut mask = Array2::from_shape_fn((40, 40), |(y, x)| {
            let dy = y as f32 - 20.0;
            let dx = x as f32 - 20.0;
            let r2 = dx * dx + dy * dy;
            (49.0..=144.0).contains(&r2)
        });
        mask[[2, 2]] = true;

        let cleaner = MorphologicalCleaner {
            min_object_size: 10,
            closing_radius: 1,
            opening_radius: 1,
            smoothing_radius: 0,
            hole_area_threshold: 400,
        };
        let out = cleaner.run(&mask);
        assert!(!out[[2, 2]]);
        assert!(out[[20, 20]]);
    }
}
