// Connected-component labeling and region boundary tracing on ndarray masks

use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        static FOUR: [(isize, isize); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];
        static EIGHT: [(isize, isize); 8] = [
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
            (-1, -1),
        ];
        match self {
            Connectivity::Four => &FOUR[..],
            Connectivity::Eight => &EIGHT[..],
        }
    }
}

/// Label the `true` pixels of `mask`.
///
/// Ids start at 1 and follow the raster order of each component's first
/// pixel. Returns the label image and the number of components.
pub fn label_components(mask: &Array2<bool>, connectivity: Connectivity) -> (Array2<u32>, u32) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let mut next = 0u32;

    for y in 0..h {
        for x in 0..w {
            if mask[[y, x]] && labels[[y, x]] == 0 {
                next += 1;
                flood_fill_label(mask, &mut labels, x, y, next, connectivity);
            }
        }
    }

    (labels, next)
}

fn flood_fill_label(
    mask: &Array2<bool>,
    labels: &mut Array2<u32>,
    start_x: usize,
    start_y: usize,
    label: u32,
    connectivity: Connectivity,
) {
    let (h, w) = mask.dim();
    let mut stack = vec![(start_x, start_y)];
    labels[[start_y, start_x]] = label;

    while let Some((x, y)) = stack.pop() {
        for &(dx, dy) in connectivity.offsets() {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            if mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                labels[[ny, nx]] = label;
                stack.push((nx, ny));
            }
        }
    }
}

/// Pixel count per label, indexed by label id (index 0 is background).
pub fn component_areas(labels: &Array2<u32>, count: u32) -> Vec<usize> {
    let mut areas = vec![0usize; count as usize + 1];
    for &l in labels.iter() {
        if (l as usize) < areas.len() {
            areas[l as usize] += 1;
        }
    }
    areas
}

/// Whether `(x, y)` belongs to `label` and has a 4-neighbor outside it.
/// Out-of-frame neighbors count as outside.
pub fn is_boundary_pixel(labels: &Array2<u32>, x: usize, y: usize, label: u32) -> bool {
    let (h, w) = labels.dim();
    if labels[[y, x]] != label {
        return false;
    }

    for &(dx, dy) in Connectivity::Four.offsets() {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
            return true;
        }
        if labels[[ny as usize, nx as usize]] != label {
            return true;
        }
    }

    false
}

/// Clockwise neighborhood starting at West.
const MOORE: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Trace the outer boundary of `label` with Moore-neighbor tracing.
///
/// `start` must be the region's first pixel in raster order, so its West
/// neighbor is known to be outside. Points are `(x, y)` and run clockwise.
/// Tracing stops when the move out of the start pixel repeats, or after a
/// step cap.
pub fn trace_contour(labels: &Array2<u32>, label: u32, start: (i32, i32)) -> Vec<(i32, i32)> {
    let (h, w) = labels.dim();
    let inside = |(x, y): (i32, i32)| {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && labels[[y as usize, x as usize]] == label
    };

    if !inside(start) {
        return Vec::new();
    }

    let max_steps = 4 * h * w + 8;

    let mut contour = vec![start];
    let mut current = start;
    let mut back = (start.0 - 1, start.1);
    let mut second = None;

    for _ in 0..max_steps {
        let back_dir = MOORE
            .iter()
            .position(|&(dx, dy)| (current.0 + dx, current.1 + dy) == back)
            .unwrap_or(0);

        let mut prev = back;
        let mut next = None;
        for k in 1..=8 {
            let (dx, dy) = MOORE[(back_dir + k) % 8];
            let candidate = (current.0 + dx, current.1 + dy);
            if inside(candidate) {
                next = Some(candidate);
                break;
            }
            prev = candidate;
        }

        let Some(next) = next else {
            // Isolated pixel.
            break;
        };

        if current == start {
            match second {
                None => second = Some(next),
                Some(s) if s == next => {
                    // Drop the closing repeat of the start pixel.
                    contour.pop();
                    break;
                }
                Some(_) => {}
            }
        }

        contour.push(next);
        current = next;
        back = prev;
    }

    contour
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Array2<bool> {
        let h = rows.len();
        let w = rows[0].len();
        Array2::from_shape_fn((h, w), |(y, x)| rows[y].as_bytes()[x] == b'#')
    }

    #[test]
    fn test_label_raster_order_and_connectivity() {
        let mask = mask_from(&[
            "#...#",
            ".#...",
            ".....",
            "##..#",
        ]);
        let (labels8, n8) = label_components(&mask, Connectivity::Eight);
        assert_eq!(n8, 4);
        assert_eq!(labels8[[0, 0]], 1);
        assert_eq!(labels8[[1, 1]], 1);
        assert_eq!(labels8[[0, 4]], 2);
        assert_eq!(labels8[[3, 0]], 3);
        assert_eq!(labels8[[3, 4]], 4);

        let (_, n4) = label_components(&mask, Connectivity::Four);
        assert_eq!(n4, 5);
    }

    #[test]
    fn test_component_areas() {
        let mask = mask_from(&["##..", "##..", "..#."]);
        let (labels, n) = label_components(&mask, Connectivity::Eight);
        // Diagonal contact joins the single pixel to the square.
        assert_eq!(n, 1);
        assert_eq!(component_areas(&labels, n), vec![7, 5]);
    }

    #[test]
    fn test_boundary_pixel_includes_frame_edge() {
        let mask = mask_from(&["###", "###", "###"]);
        let (labels, _) = label_components(&mask, Connectivity::Eight);
        assert!(is_boundary_pixel(&labels, 0, 1, 1));
        assert!(!is_boundary_pixel(&labels, 1, 1, 1));
    }

    #[test]
    fn test_trace_square_clockwise() {
        let mask = mask_from(&[
            ".....",
            ".###.",
            ".###.",
            ".###.",
            ".....",
        ]);
        let (labels, _) = label_components(&mask, Connectivity::Eight);
        let contour = trace_contour(&labels, 1, (1, 1));
        assert_eq!(
            contour,
            vec![(1, 1), (2, 1), (3, 1), (3, 2), (3, 3), (2, 3), (1, 3), (1, 2)]
        );
    }

    #[test]
    fn test_trace_single_pixel_and_line() {
        let mask = mask_from(&["...", ".#.", "..."]);
        let (labels, _) = label_components(&mask, Connectivity::Eight);
        assert_eq!(trace_contour(&labels, 1, (1, 1)), vec![(1, 1)]);

        let line = mask_from(&["###"]);
        let (labels, _) = label_components(&line, Connectivity::Eight);
        assert_eq!(
            trace_contour(&labels, 1, (0, 0)),
            vec![(0, 0), (1, 0), (2, 0), (1, 0)]
        );
    }

    #[test]
    fn test_trace_ignores_other_labels() {
        let mask = mask_from(&["##.##", "##.##"]);
        let (labels, n) = label_components(&mask, Connectivity::Eight);
        assert_eq!(n, 2);
        let contour = trace_contour(&labels, 2, (3, 0));
        assert!(contour.iter().all(|&(x, _)| x >= 3));
        assert_eq!(contour.len(), 4);
    }
}
