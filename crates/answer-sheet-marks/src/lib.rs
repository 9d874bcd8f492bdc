//! Alignment-mark detection for scanned answer sheets.
//!
//! Sheets carry four solid dark squares down each side margin. This crate
//! finds them on a decoded raster without any knowledge of the template:
//!
//! - only two vertical strips are searched (left and right margins),
//! - a fixed-size window slides over each strip and is accepted when it is
//!   dark, uniformly inked and fully inside the image,
//! - accepted windows are deduplicated by distance and refined to the
//!   centroid of the dark blob,
//! - marks are sorted top to bottom and labelled `L1..L4` / `R1..R4`.
//!
//! ```
//! use answer_sheet_core::GrayImage;
//! use answer_sheet_marks::{detect_alignment_marks, MarkDetectorParams};
//!
//! let img = GrayImage::filled(200, 200, 255);
//! let det = detect_alignment_marks(&img.as_image_view(), &MarkDetectorParams::default()).unwrap();
//! assert_eq!(det.total(), 0);
//! assert_eq!(det.calibration_quality, 0.0);
//! ```

mod detect;
mod integral;
mod params;

pub use detect::{
    calibration_quality, detect_alignment_marks, DetectedMark, MarkDetectError, MarkDetection,
    Side,
};
pub use params::MarkDetectorParams;
