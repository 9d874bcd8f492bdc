use serde::{Deserialize, Serialize};

/// Thresholds and search geometry for [`detect_alignment_marks`](crate::detect_alignment_marks).
///
/// Strip bounds are fractions of the image size. Partial JSON is accepted;
/// missing fields keep their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkDetectorParams {
    /// Horizontal extent of the left search strip.
    pub left_strip: [f64; 2],
    /// Horizontal extent of the right search strip.
    pub right_strip: [f64; 2],
    /// Vertical extent of both strips; keeps the sheet edges out.
    pub vertical_range: [f64; 2],
    /// Side of the square sampling window, in pixels.
    pub window_px: usize,
    /// Distance between neighbouring window origins, in pixels.
    pub step_px: usize,
    /// A pixel is dark when its intensity is below this value.
    pub dark_threshold: u8,
    pub min_dark_ratio: f32,
    /// Mean window brightness must stay below `dark_threshold + brightness_margin`.
    pub brightness_margin: u8,
    /// Windows need `uniformity > min_uniformity`.
    pub min_uniformity: f32,
    /// Minimum in-image share of the window area.
    pub min_coverage: f32,
    /// Candidates closer than this (on both axes) to an accepted mark are dropped.
    /// Also the half-size of the centroid refinement box.
    pub dedup_distance_px: f64,
    pub max_marks_per_strip: usize,
    /// Mark count of a complete detection; divisor of the calibration quality.
    pub expected_marks: usize,
}

impl Default for MarkDetectorParams {
    fn default() -> Self {
        Self {
            left_strip: [0.0, 0.15],
            right_strip: [0.85, 1.0],
            vertical_range: [0.02, 0.98],
            window_px: 15,
            step_px: 5,
            dark_threshold: 80,
            min_dark_ratio: 0.7,
            brightness_margin: 20,
            min_uniformity: 0.5,
            min_coverage: 0.8,
            dedup_distance_px: 30.0,
            max_marks_per_strip: 4,
            expected_marks: 8,
        }
    }
}

impl MarkDetectorParams {
    /// Check ranges; returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let range_ok = |r: [f64; 2]| {
            r[0].is_finite() && r[1].is_finite() && 0.0 <= r[0] && r[0] < r[1] && r[1] <= 1.0
        };
        if !range_ok(self.left_strip) || !range_ok(self.right_strip) {
            return Err("strip bounds must satisfy 0 <= start < end <= 1".into());
        }
        if !range_ok(self.vertical_range) {
            return Err("vertical range must satisfy 0 <= start < end <= 1".into());
        }
        if self.window_px == 0 || self.step_px == 0 {
            return Err("window and step must be > 0".into());
        }
        if !(self.dedup_distance_px.is_finite() && self.dedup_distance_px >= 0.0) {
            return Err("dedup distance must be finite and >= 0".into());
        }
        if self.expected_marks == 0 {
            return Err("expected_marks must be > 0".into());
        }
        Ok(())
    }

    /// Mean brightness a mark window must stay below.
    #[inline]
    pub(crate) fn brightness_ceiling(&self) -> f32 {
        self.dark_threshold as f32 + self.brightness_margin as f32
    }
}
