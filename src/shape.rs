//! Coarse shape-based acceptance of labeled regions.

use log::debug;
use ndarray::Array2;

use crate::contours::{label_components, Connectivity};
use crate::geometry::{region_metrics, RegionMetrics};
use crate::types::DetectionParameters;

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRegion {
    pub metrics: RegionMetrics,
    pub accepted_by_shape: bool,
    pub accepted_by_size: bool,
}

impl LabeledRegion {
    pub fn is_accepted(&self) -> bool {
        self.accepted_by_shape || self.accepted_by_size
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    /// Only the accepted regions.
    pub mask: Array2<bool>,
    /// Accepted regions relabeled `1..=count` in raster order.
    pub labels: Array2<u32>,
    pub count: u32,
    /// Every region of the input mask with both verdicts.
    pub regions: Vec<LabeledRegion>,
}

pub struct ShapeClassifier {
    pub eccentricity_threshold: f32,
    pub area_threshold_small: u32,
    pub area_threshold_large: u32,
}

impl ShapeClassifier {
    pub fn from_params(params: &DetectionParameters) -> Self {
        Self {
            eccentricity_threshold: params.eccentricity_threshold,
            area_threshold_small: params.area_threshold_small,
            area_threshold_large: params.area_threshold_large,
        }
    }

    /// Round enough and not tiny.
    pub fn accept_by_shape(&self, m: &RegionMetrics) -> bool {
        m.eccentricity < self.eccentricity_threshold && m.area > self.area_threshold_small
    }

    /// Large regardless of shape, e.g. touching cells.
    pub fn accept_by_size(&self, m: &RegionMetrics) -> bool {
        m.area > self.area_threshold_large
    }

    pub fn run(&self, mask: &Array2<bool>) -> Classification {
        let (labels, count) = label_components(mask, Connectivity::Eight);
        let regions: Vec<LabeledRegion> = region_metrics(&labels, count, None)
            .into_iter()
            .map(|metrics| LabeledRegion {
                accepted_by_shape: self.accept_by_shape(&metrics),
                accepted_by_size: self.accept_by_size(&metrics),
                metrics,
            })
            .collect();

        let mut keep = vec![false; count as usize + 1];
        for r in &regions {
            keep[r.metrics.label as usize] = r.is_accepted();
        }
        let accepted = labels.mapv(|l| l != 0 && keep[l as usize]);
        let (accepted_labels, accepted_count) = label_components(&accepted, Connectivity::Eight);

        debug!(
            "shape classifier: {} regions, {} accepted",
            regions.len(),
            accepted_count
        );

        Classification {
            mask: accepted,
            labels: accepted_labels,
            count: accepted_count,
            regions,
        }
    }
}
