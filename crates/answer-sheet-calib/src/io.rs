//! JSON configuration and report helpers for scan calibration.

use crate::estimate::TransformParams;
use crate::pipeline::ScanCalibration;
use answer_sheet_marks::MarkDetectorParams;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum CalibIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibConfigError {
    #[error("detector: {0}")]
    Detector(String),
    #[error("transform: {0}")]
    Transform(String),
}

/// Detector and transform settings for one calibration run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrateConfig {
    pub detector: MarkDetectorParams,
    pub transform: TransformParams,
}

impl CalibrateConfig {
    /// Load a JSON config from disk; absent fields keep their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibIoError> {
        write_pretty(path, self)
    }

    pub fn validate(&self) -> Result<(), CalibConfigError> {
        self.detector
            .validate()
            .map_err(CalibConfigError::Detector)?;
        let t = &self.transform;
        if !(0.0..=1.0).contains(&t.default_confidence) {
            return Err(CalibConfigError::Transform(
                "default_confidence must lie in [0, 1]".into(),
            ));
        }
        if t.expected_marks == 0 {
            return Err(CalibConfigError::Transform(
                "expected_marks must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl ScanCalibration {
    /// Write the full calibration report as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibIoError> {
        write_pretty(path, self)
    }
}

fn write_pretty<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), CalibIoError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
