use std::f32::consts::PI;

use log::debug;
use ndarray::Array2;

use crate::contours::trace_contour;
use crate::geometry::{region_metrics, RegionMetrics};
use crate::types::{BoundingBox, Detection, DetectionParameters, Point2f};

/// `perimeter² / (4π·area)`: 1 for a disk, larger for ragged outlines.
pub fn circularity(perimeter: f32, area: u32) -> f32 {
    if perimeter <= 0.0 || area == 0 {
        return 0.0;
    }
    perimeter * perimeter / (4.0 * PI * area as f32)
}

/// Final accept/reject stage. Every range bound is inclusive.
pub struct DetectionFilter {
    pub area_min: u32,
    pub area_max: u32,
    pub perimeter_min: f32,
    pub perimeter_max: f32,
    pub circularity_min: f32,
    pub circularity_max: f32,
    pub aspect_ratio_threshold: f32,
}

impl DetectionFilter {
    pub fn from_params(params: &DetectionParameters) -> Self {
        Self {
            area_min: params.area_min,
            area_max: params.area_max,
            perimeter_min: params.perimeter_min,
            perimeter_max: params.perimeter_max,
            circularity_min: params.circularity_min,
            circularity_max: params.circularity_max,
            aspect_ratio_threshold: params.aspect_ratio_threshold,
        }
    }

    pub fn aspect_ok(&self, bbox: &BoundingBox) -> bool {
        let long = bbox.width.max(bbox.height) as f32;
        let short = bbox.width.min(bbox.height) as f32;
        long == short || long <= self.aspect_ratio_threshold * short
    }

    pub fn accepts(&self, m: &RegionMetrics) -> bool {
        let c = circularity(m.perimeter, m.area);
        (self.area_min..=self.area_max).contains(&m.area)
            && (self.perimeter_min..=self.perimeter_max).contains(&m.perimeter)
            && (self.circularity_min..=self.circularity_max).contains(&c)
            && self.aspect_ok(&m.bbox)
    }

    /// Turn the accepted regions of `labels` into detections, in ascending
    /// label order, translated by the ROI `origin`.
    pub fn run(
        &self,
        labels: &Array2<u32>,
        count: u32,
        intensity: &Array2<f32>,
        origin: (u32, u32),
    ) -> Vec<Detection> {
        let regions = region_metrics(labels, count, Some(intensity));
        let total = regions.len();

        let detections: Vec<Detection> = regions
            .iter()
            .filter(|m| self.accepts(m))
            .map(|m| to_detection(labels, m, origin))
            .collect();

        debug!(
            "detection filter: {} of {} regions accepted",
            detections.len(),
            total
        );

        detections
    }
}

fn to_detection(labels: &Array2<u32>, m: &RegionMetrics, origin: (u32, u32)) -> Detection {
    let (ox, oy) = origin;
    let shift = |p: Point2f| Point2f::new(p.x + ox as f32, p.y + oy as f32);

    let local_center = m.weighted_centroid.unwrap_or_else(|| m.bbox.center());
    let radius = (m.bbox.width as f32 / 2.0 + m.bbox.height as f32 / 2.0) / 2.0;

    let contour = trace_contour(labels, m.label, m.first_pixel)
        .into_iter()
        .map(|(x, y)| (x + ox as i32, y + oy as i32))
        .collect();

    Detection {
        center: shift(local_center),
        centroid: shift(m.centroid),
        radius,
        bbox: m.bbox.translate(ox, oy),
        contour,
        area: m.area,
        perimeter: m.perimeter,
        circularity: circularity(m.perimeter, m.area),
        eccentricity: m.eccentricity,
    }
}
