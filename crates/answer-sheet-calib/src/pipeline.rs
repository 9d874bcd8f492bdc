use crate::estimate::{estimate_transform, CalibrationResult};
use crate::io::{CalibConfigError, CalibrateConfig};
use crate::map::{map_with_transform, CoordinateMap};
use crate::validate::{validate_against_template, ValidationReport};
use answer_sheet_core::ImageView;
use answer_sheet_layout::Template;
use answer_sheet_marks::{detect_alignment_marks, MarkDetectError, MarkDetection};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum CalibrateError {
    #[error("invalid calibration config: {0}")]
    Config(#[from] CalibConfigError),
    #[error(transparent)]
    Detect(#[from] MarkDetectError),
}

/// Everything produced for one scanned sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanCalibration {
    pub detection: MarkDetection,
    pub calibration: CalibrationResult,
    pub map: CoordinateMap,
    pub report: ValidationReport,
}

/// Detect marks, fit the transform, map bubbles and validate, in one pass.
///
/// The config is validated first. Only an invalid config or an unusable
/// image buffer fail; poor scans produce a result flagged as low quality.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip(template, image, config),
        fields(exam = %template.exam_name, width = image.width, height = image.height)
    )
)]
pub fn calibrate_scan(
    template: &Template,
    image: &ImageView<'_>,
    config: &CalibrateConfig,
) -> Result<ScanCalibration, CalibrateError> {
    config.validate()?;
    let detection = detect_alignment_marks(image, &config.detector)?;
    let (w, h) = (image.width as u32, image.height as u32);
    let calibration = estimate_transform(
        &template.alignment_marks,
        &detection.to_vec(),
        w,
        h,
        &config.transform,
    );
    let map = map_with_transform(template, &calibration.matrix, w, h);
    let report = validate_against_template(&map, template);
    info!(
        "calibrated '{}': {}/{} marks, model {:?}, valid={}",
        template.exam_name,
        detection.total(),
        config.transform.expected_marks,
        calibration.model,
        report.is_valid
    );
    Ok(ScanCalibration {
        detection,
        calibration,
        map,
        report,
    })
}
