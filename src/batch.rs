//! Sequential detection over many frames with a cooperative stop flag.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use serde::Serialize;

use crate::det::CellDetector;
use crate::engine::{DetectionStatus, EngineError};
use crate::image_impl::Frame;
use crate::types::{Detection, DetectionParameters, Roi};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    pub name: String,
    pub status: DetectionStatus,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub frames: Vec<FrameOutcome>,
    pub failures: Vec<FrameFailure>,
    /// True when the stop flag ended the run before the input was exhausted.
    pub stopped: bool,
}

impl BatchOutcome {
    pub fn total_detections(&self) -> usize {
        self.frames.iter().map(|f| f.detections.len()).sum()
    }
}

/// Detect on every frame of `frames` in order.
///
/// Parameters are validated once up front; that is the only error returned.
/// A frame that fails to load or to process is recorded in `failures` and
/// the run continues. `stop` is polled before each frame.
pub fn run_batch<I, S>(
    params: &DetectionParameters,
    frames: I,
    roi: Option<Roi>,
    stop: &AtomicBool,
) -> Result<BatchOutcome, EngineError>
where
    I: IntoIterator<Item = (S, Result<Frame, EngineError>)>,
    S: Into<String>,
{
    let detector = CellDetector::new(params.clone())?;
    let mut outcome = BatchOutcome::default();

    for (name, frame) in frames {
        if stop.load(Ordering::Relaxed) {
            info!("batch stopped after {} frames", outcome.frames.len() + outcome.failures.len());
            outcome.stopped = true;
            break;
        }

        let name = name.into();
        match frame.and_then(|f| detector.detect_with_report(&f, roi)) {
            Ok(report) => outcome.frames.push(FrameOutcome {
                name,
                status: report.status,
                detections: report.detections,
            }),
            Err(e) => {
                warn!("{}: {}", name, e);
                outcome.failures.push(FrameFailure {
                    name,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "batch done: {} frames, {} failures, {} detections",
        outcome.frames.len(),
        outcome.failures.len(),
        outcome.total_detections()
    );
    Ok(outcome)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, EngineError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::disk_frame;

    fn params() -> DetectionParameters {
        DetectionParameters {
            hole_area_threshold: 4000,
            area_min: 200,
            area_max: 6000,
            perimeter_max: 400.0,
            aspect_ratio_threshold: 3.0,
            ..Default::default()
        }
    }

    fn frame() -> Result<Frame, EngineError> {
        Ok(disk_frame(96, 96, &[(48.0, 48.0)], 20.0, 40, 200))
    }

    #[test]
    fn test_invalid_parameters_halt_before_any_frame() {
        let bad = DetectionParameters {
            blur_kernel_size: 4,
            ..Default::default()
        };
        let stop = AtomicBool::new(false);
        let res = run_batch(&bad, vec![("a", frame())], None, &stop);
        assert!(matches!(res, Err(EngineError::InvalidParameter(_))));
    }

    #[test]
    fn test_failing_frame_does_not_abort() {
        let stop = AtomicBool::new(false);
        let frames = vec![
            ("a", frame()),
            ("broken", Err(EngineError::ImageError("truncated".to_string()))),
            ("empty", Frame::from_gray8(0, 0, Vec::new())),
            ("b", frame()),
        ];
        let out = run_batch(&params(), frames, None, &stop).unwrap();

        assert!(!out.stopped);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.failures.len(), 2);
        assert_eq!(out.failures[0].name, "broken");
        assert_eq!(out.failures[1].name, "empty");
        assert_eq!(out.frames[1].name, "b");
        assert_eq!(out.total_detections(), 2);
    }

    #[test]
    fn test_stop_flag_is_checked_between_frames() {
        let stop = AtomicBool::new(false);
        let frames = (0..5).map(|i| {
            if i == 2 {
                stop.store(true, Ordering::Relaxed);
            }
            (format!("f{}", i), frame())
        });
        let out = run_batch(&params(), frames, None, &stop).unwrap();
        assert!(out.stopped);
        assert_eq!(out.frames.len(), 2);
    }

    #[test]
    fn test_invalid_roi_is_not_a_failure() {
        let stop = AtomicBool::new(false);
        let out = run_batch(&params(), vec![("a", frame())], Some(Roi::new(0, 0, 0, 0)), &stop).unwrap();
        assert!(out.failures.is_empty());
        assert_eq!(out.frames[0].status, DetectionStatus::InvalidRoi);
        assert!(out.frames[0].detections.is_empty());
    }
}
