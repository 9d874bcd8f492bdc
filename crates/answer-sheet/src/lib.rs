//! High-level facade crate for the `answer-sheet-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the layout, mark detection and calibration crates
//! - (feature-gated) helpers that decode a scanned sheet with the `image`
//!   crate and run the full calibration on it
//!
//! ## Quickstart
//!
//! ```no_run
//! use answer_sheet::layout::{generate_for_paper, ExamSpec, LayoutOptions, PaperSize};
//! use answer_sheet::scan;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = ExamSpec::from_json(&std::fs::read_to_string("exam.json")?)?;
//! let template = generate_for_paper(&spec, PaperSize::A4, 300, &LayoutOptions::default())?;
//!
//! let result = scan::calibrate_file(&template, "scan.png", &Default::default())?;
//! println!(
//!     "{} marks, valid map: {}",
//!     result.detection.total(),
//!     result.report.is_valid
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `answer_sheet::core`: images, transform matrices, homography, logging.
//! - `answer_sheet::layout`: exam specs, geometry profiles, templates, rendering.
//! - `answer_sheet::marks`: alignment-mark detection on scanned images.
//! - `answer_sheet::calib`: transform estimation, coordinate maps, validation.
//! - `answer_sheet::scan` (feature `image`): helpers from files and `image` buffers.

pub use answer_sheet_calib as calib;
pub use answer_sheet_core as core;
pub use answer_sheet_layout as layout;
pub use answer_sheet_marks as marks;

pub use answer_sheet_calib::{
    calibrate_scan, CalibrateConfig, CalibrateError, CoordinateMap, ScanCalibration,
};
pub use answer_sheet_core::{TransformMatrix, TransformModel};
pub use answer_sheet_layout::{ExamSpec, GeometryProfile, PaperSize, Template};
pub use answer_sheet_marks::{DetectedMark, MarkDetection, MarkDetectorParams};

#[cfg(feature = "image")]
pub mod scan;
