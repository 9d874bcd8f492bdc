//! Calibration of scanned answer sheets against their template.
//!
//! - [`estimate_transform`] fits the nominal-to-scan transform from matched
//!   alignment marks (single anchor, scale + translation, affine or
//!   homography, with automatic downgrade when marks are missing).
//! - [`map_coordinates`] projects every bubble of a template through that
//!   transform into integer image pixels.
//! - [`validate_map`] runs the structural checks on the resulting map.
//! - [`calibrate_scan`] chains detection, estimation, mapping and validation.
//!
//! Degraded inputs never abort: missing marks fall back to simpler models or
//! the identity, and a malformed stored matrix maps points untransformed.

mod estimate;
mod io;
mod map;
mod pipeline;
mod validate;

pub use estimate::{estimate_transform, CalibrationResult, FallbackReason, TransformParams};
pub use io::{CalibConfigError, CalibIoError, CalibrateConfig};
pub use map::{
    map_calibrated, map_coordinates, map_with_transform, preview_map, BubbleCoordinate,
    CoordinateMap, MapMetadata, MarkPixel,
};
pub use pipeline::{calibrate_scan, CalibrateError, ScanCalibration};
pub use validate::{
    check_map, validate_against_template, validate_map, ValidationIssue, ValidationReport,
    ValidationStats, ValidationWarning, EXPECTED_MARKS,
};
