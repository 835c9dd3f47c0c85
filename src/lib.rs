//! # cellseg - Classical Cell Segmentation in Pure Rust
//!
//! cellseg finds round, blob-like cells in 8-bit microscope frames using a
//! fixed chain of classical image-processing stages: contrast normalization,
//! fused edge detection, morphological cleanup, shape classification, an
//! optional watershed split of touching cells and a final range filter.
//!
//! ## Features
//!
//! - **Pure Rust**: No OpenCV, no model files
//! - **Deterministic**: Same frame and parameters give the same detections
//! - **Stateless**: Every call takes an immutable parameter set
//! - **Adapters**: Batch runner, live frame slot, offset sweep, CLI and C ABI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cellseg::{detect, imread, DetectionParameters, Roi};
//!
//! let frame = imread("cells.png")?;
//! let params = DetectionParameters::default();
//!
//! let detections = detect(&frame, Some(Roi::new(0, 0, 512, 512)), &params)?;
//!
//! for d in detections {
//!     println!("({:.1}, {:.1}) r={:.1}", d.center.x, d.center.y, d.radius);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
mod det;
mod engine;
mod image_impl;
mod types;

// Pipeline stages
pub mod contours;
pub mod edges;
pub mod filters;
pub mod geometry;
pub mod morphology;
pub mod postprocess;
pub mod preprocess;
pub mod shape;
pub mod watershed;

// Adapters
pub mod batch;
pub mod live;
pub mod sweep;

#[cfg(test)]
mod test_utils;

// FFI module for C bindings
#[cfg(feature = "ffi")]
pub mod ffi;

// Public API exports
pub use crate::det::{CellDetector, DetectionReport};
pub use crate::engine::{DetectionStatus, EngineError};
pub use crate::image_impl::{array_to_gray, gray_to_array, imread, mask_to_image, Frame};
pub use crate::types::{
    write_detections_json, BoundingBox, Detection, DetectionParameters, DetectionRecord, Point2f,
    Roi, ThresholdMethod, MIN_ROI_SIDE,
};

/// Run the full pipeline once.
///
/// Shorthand for `CellDetector::new(params.clone())?.detect(frame, roi)`.
pub fn detect(
    frame: &Frame,
    roi: Option<Roi>,
    params: &DetectionParameters,
) -> Result<Vec<Detection>, EngineError> {
    CellDetector::new(params.clone())?.detect(frame, roi)
}
