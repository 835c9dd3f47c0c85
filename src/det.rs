use std::time::Instant;

use log::{debug, warn};
use ndarray::Array2;

use crate::edges::EdgeFusion;
use crate::engine::{DetectionStatus, EngineError};
use crate::image_impl::Frame;
use crate::morphology::MorphologicalCleaner;
use crate::postprocess::DetectionFilter;
use crate::preprocess::Preprocessor;
use crate::shape::ShapeClassifier;
use crate::types::{BoundingBox, Detection, DetectionParameters, Roi};
use crate::watershed::WatershedSeparator;

/// Detections plus what happened on the way.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    pub status: DetectionStatus,
    /// Clamped ROI actually processed, in frame coordinates.
    pub roi: Option<BoundingBox>,
    /// Final segmentation mask over the ROI.
    pub mask: Option<Array2<bool>>,
    pub elapse: f64,
}

impl DetectionReport {
    fn empty(status: DetectionStatus, roi: Option<BoundingBox>, elapse: f64) -> Self {
        Self {
            detections: Vec::new(),
            status,
            roi,
            mask: None,
            elapse,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Stateless cell detector holding a validated parameter set.
#[derive(Debug, Clone)]
pub struct CellDetector {
    params: DetectionParameters,
}

impl CellDetector {
    pub fn new(params: DetectionParameters) -> Result<Self, EngineError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &DetectionParameters {
        &self.params
    }

    pub fn detect(&self, frame: &Frame, roi: Option<Roi>) -> Result<Vec<Detection>, EngineError> {
        Ok(self.detect_with_report(frame, roi)?.detections)
    }

    pub fn detect_with_report(
        &self,
        frame: &Frame,
        roi: Option<Roi>,
    ) -> Result<DetectionReport, EngineError> {
        let start = Instant::now();
        let p = &self.params;

        if frame.is_empty() {
            return Err(EngineError::InvalidFrame(format!(
                "empty {}x{} frame",
                frame.width(),
                frame.height()
            )));
        }

        let rect = match roi {
            None => BoundingBox::new(0, 0, frame.width(), frame.height()),
            Some(r) => match r.clamp_to(frame.width(), frame.height()) {
                Some(rect) => rect,
                None => {
                    warn!(
                        "invalid ROI {:?} for {}x{} frame, skipping",
                        r,
                        frame.width(),
                        frame.height()
                    );
                    return Ok(DetectionReport::empty(
                        DetectionStatus::InvalidRoi,
                        None,
                        start.elapsed().as_secs_f64(),
                    ));
                }
            },
        };

        let gray = frame.crop_gray(&rect);
        let pre = Preprocessor::from_params(p).run(&gray)?;

        let fused = EdgeFusion::from_params(p).run(&pre).fused();
        let fg = fused.iter().filter(|&&v| v).count();
        if fg == 0 || fg == fused.len() {
            debug!("fused mask is degenerate ({} of {} pixels)", fg, fused.len());
            return Ok(DetectionReport::empty(
                DetectionStatus::DegenerateMask,
                Some(rect),
                start.elapsed().as_secs_f64(),
            ));
        }

        let cleaned = MorphologicalCleaner::from_params(p).run(&fused);
        if !cleaned.iter().any(|&v| v) {
            debug!("cleaned mask is empty");
            return Ok(DetectionReport::empty(
                DetectionStatus::DegenerateMask,
                Some(rect),
                start.elapsed().as_secs_f64(),
            ));
        }

        let classified = ShapeClassifier::from_params(p).run(&cleaned);
        let (labels, count) = if p.use_watershed {
            WatershedSeparator::from_params(p).run(&classified.labels, classified.count)
        } else {
            (classified.labels, classified.count)
        };

        let detections =
            DetectionFilter::from_params(p).run(&labels, count, &pre.intensity, (rect.x, rect.y));
        let elapse = start.elapsed().as_secs_f64();
        debug!("{} detections in {:.3}s", detections.len(), elapse);

        Ok(DetectionReport {
            detections,
            status: DetectionStatus::Completed,
            roi: Some(rect),
            mask: Some(labels.mapv(|l| l != 0)),
            elapse,
        })
    }
}
