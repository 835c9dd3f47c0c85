use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

/// Clamped ROIs with a side shorter than this are treated as degenerate.
pub const MIN_ROI_SIDE: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2f {
    pub x: f32,
    pub y: f32,
}

impl Point2f {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2f) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned pixel rectangle `(x, y, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point2f {
        Point2f::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    pub fn contains(&self, p: &Point2f) -> bool {
        p.x >= self.x as f32
            && p.y >= self.y as f32
            && p.x <= self.right() as f32
            && p.y <= self.bottom() as f32
    }

    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grow the box by `margin_pct` percent of its size on every side, clamped
    /// to a `frame_w` x `frame_h` frame.
    pub fn expanded(&self, margin_pct: f32, frame_w: u32, frame_h: u32) -> Self {
        let ratio = margin_pct.max(0.0) / 100.0;
        let grow_w = (self.width as f32 * ratio) as u32;
        let grow_h = (self.height as f32 * ratio) as u32;

        let x = self.x.saturating_sub(grow_w);
        let y = self.y.saturating_sub(grow_h);
        let width = (self.width + 2 * grow_w).min(frame_w.saturating_sub(x));
        let height = (self.height + 2 * grow_h).min(frame_h.saturating_sub(y));
        Self::new(x, y, width, height)
    }

    /// Center-based normalized `(cx, cy, w, h)` as consumed by dataset tooling.
    pub fn normalized_xywh(&self, frame_w: u32, frame_h: u32) -> [f32; 4] {
        let fw = frame_w.max(1) as f32;
        let fh = frame_h.max(1) as f32;
        let c = self.center();
        [c.x / fw, c.y / fh, self.width as f32 / fw, self.height as f32 / fh]
    }
}

/// Region of interest in frame coordinates.
///
/// Signed so that callers can hand over whatever their UI produced; validity is
/// decided by [`Roi::clamp_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from two corners given in any order.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (x1, x2) = if x1 > x2 { (x2, x1) } else { (x1, x2) };
        let (y1, y2) = if y1 > y2 { (y2, y1) } else { (y1, y2) };
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Intersect with a `frame_w` x `frame_h` frame.
    ///
    /// Returns `None` for non-positive sizes, ROIs outside the frame and
    /// intersections with a side shorter than [`MIN_ROI_SIDE`].
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Option<BoundingBox> {
        if self.width <= 0 || self.height <= 0 {
            return None;
        }

        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(frame_w as i64);
        let y1 = (self.y as i64 + self.height as i64).min(frame_h as i64);

        if x1 - x0 < MIN_ROI_SIDE as i64 || y1 - y0 < MIN_ROI_SIDE as i64 {
            return None;
        }

        Some(BoundingBox::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

impl FromStr for Roi {
    type Err = EngineError;

    /// Parse `x,y,w,h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::InvalidParameter(format!("roi '{}': {}", s, e)))?;

        match parts.as_slice() {
            [x, y, w, h] => Ok(Roi::new(*x, *y, *w, *h)),
            _ => Err(EngineError::InvalidParameter(format!(
                "roi '{}': expected x,y,w,h",
                s
            ))),
        }
    }
}

/// Automatic binarization threshold used for the compass edge bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    #[default]
    Otsu,
    Triangle,
}

impl FromStr for ThresholdMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "otsu" => Ok(ThresholdMethod::Otsu),
            "triangle" => Ok(ThresholdMethod::Triangle),
            other => Err(EngineError::InvalidParameter(format!(
                "unknown threshold method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdMethod::Otsu => write!(f, "otsu"),
            ThresholdMethod::Triangle => write!(f, "triangle"),
        }
    }
}

/// Tunable parameter set for one detection call.
///
/// Every field has a default, so partial JSON documents load fine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    // Preprocessing
    pub clahe_clip_limit: f32,
    pub clahe_tile_grid: u32,
    pub gaussian_sigma: f32,
    pub blur_kernel_size: u32,

    // Edge fusion
    pub adaptive_block_size: u32,
    pub adaptive_offset: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub edge_threshold: f32,
    pub threshold_method: ThresholdMethod,
    pub compass_min_contrast: f32,

    // Morphology
    pub min_object_size: u32,
    pub closing_radius: u32,
    pub opening_radius: u32,
    pub smoothing_radius: u32,
    pub hole_area_threshold: u32,

    // Coarse shape classification
    pub eccentricity_threshold: f32,
    pub area_threshold_small: u32,
    pub area_threshold_large: u32,

    // Watershed separation
    pub use_watershed: bool,
    pub watershed_distance_threshold: f32,
    pub watershed_compactness: f32,
    pub watershed_min_area: u32,

    // Final filter, all bounds inclusive
    pub area_min: u32,
    pub area_max: u32,
    pub perimeter_min: f32,
    pub perimeter_max: f32,
    pub circularity_min: f32,
    pub circularity_max: f32,
    pub aspect_ratio_threshold: f32,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tile_grid: 8,
            gaussian_sigma: 2.0,
            blur_kernel_size: 3,

            adaptive_block_size: 11,
            adaptive_offset: 2.0,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_threshold: 50.0,
            threshold_method: ThresholdMethod::Otsu,
            compass_min_contrast: 0.0,

            min_object_size: 25,
            closing_radius: 1,
            opening_radius: 1,
            smoothing_radius: 0,
            hole_area_threshold: 64,

            eccentricity_threshold: 0.95,
            area_threshold_small: 100,
            area_threshold_large: 300,

            use_watershed: true,
            watershed_distance_threshold: 10.0,
            watershed_compactness: 0.5,
            watershed_min_area: 500,

            area_min: 80,
            area_max: 500,
            perimeter_min: 30.0,
            perimeter_max: 200.0,
            circularity_min: 0.3,
            circularity_max: 3.0,
            aspect_ratio_threshold: 2.0,
        }
    }
}

impl DetectionParameters {
    /// Reject misconfiguration before any pixel is touched.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn non_negative(name: &str, v: f32) -> Result<(), EngineError> {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::InvalidParameter(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, v
                )));
            }
            Ok(())
        }

        fn ordered<T: PartialOrd + fmt::Display>(name: &str, lo: T, hi: T) -> Result<(), EngineError> {
            if lo > hi {
                return Err(EngineError::InvalidParameter(format!(
                    "{}: min {} exceeds max {}",
                    name, lo, hi
                )));
            }
            Ok(())
        }

        non_negative("gaussian_sigma", self.gaussian_sigma)?;
        non_negative("adaptive_offset", self.adaptive_offset)?;
        non_negative("canny_low", self.canny_low)?;
        non_negative("canny_high", self.canny_high)?;
        non_negative("edge_threshold", self.edge_threshold)?;
        non_negative("compass_min_contrast", self.compass_min_contrast)?;
        non_negative("eccentricity_threshold", self.eccentricity_threshold)?;
        non_negative("watershed_distance_threshold", self.watershed_distance_threshold)?;
        non_negative("watershed_compactness", self.watershed_compactness)?;
        non_negative("perimeter_min", self.perimeter_min)?;
        non_negative("perimeter_max", self.perimeter_max)?;
        non_negative("circularity_min", self.circularity_min)?;
        non_negative("circularity_max", self.circularity_max)?;

        if !self.clahe_clip_limit.is_finite() || self.clahe_clip_limit <= 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "clahe_clip_limit must be positive, got {}",
                self.clahe_clip_limit
            )));
        }
        if self.clahe_tile_grid == 0 {
            return Err(EngineError::InvalidParameter(
                "clahe_tile_grid must be at least 1".to_string(),
            ));
        }
        if self.blur_kernel_size % 2 == 0 {
            return Err(EngineError::InvalidParameter(format!(
                "blur_kernel_size must be odd, got {}",
                self.blur_kernel_size
            )));
        }
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(EngineError::InvalidParameter(format!(
                "adaptive_block_size must be odd and >= 3, got {}",
                self.adaptive_block_size
            )));
        }
        if !self.aspect_ratio_threshold.is_finite() || self.aspect_ratio_threshold <= 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "aspect_ratio_threshold must be positive, got {}",
                self.aspect_ratio_threshold
            )));
        }

        ordered("canny thresholds", self.canny_low, self.canny_high)?;
        ordered("area", self.area_min, self.area_max)?;
        ordered("perimeter", self.perimeter_min, self.perimeter_max)?;
        ordered("circularity", self.circularity_min, self.circularity_max)?;

        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
        let params: Self = serde_json::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// One accepted object, in full-frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Intensity-weighted centroid, or the bounding-box center when the region
    /// carries no intensity.
    pub center: Point2f,
    /// Plain pixel centroid.
    pub centroid: Point2f,
    pub radius: f32,
    pub bbox: BoundingBox,
    /// Outer boundary, clockwise from the top-left pixel.
    pub contour: Vec<(i32, i32)>,
    pub area: u32,
    pub perimeter: f32,
    pub circularity: f32,
    pub eccentricity: f32,
}

impl Detection {
    pub fn to_record(&self) -> DetectionRecord {
        DetectionRecord {
            center_x: self.center.x,
            center_y: self.center.y,
            radius: self.radius,
            bbox: [self.bbox.x, self.bbox.y, self.bbox.width, self.bbox.height],
        }
    }
}

/// Flat shape written by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    pub bbox: [u32; 4],
}

pub fn write_detections_json<P: AsRef<Path>>(
    path: P,
    detections: &[Detection],
) -> Result<(), EngineError> {
    let records: Vec<DetectionRecord> = detections.iter().map(Detection::to_record).collect();
    std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
    Ok(())
}
