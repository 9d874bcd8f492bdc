//! Template data model: nominal sheet geometry produced by the generator.
//!
//! Positions are relative to the page (`[0, 1] × [0, 1]`) so the same template
//! maps onto scans of any resolution.

use crate::exam::QuestionType;
use crate::profile::PaperSize;
use answer_sheet_core::TransformModel;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Point in page-relative units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelPoint {
    pub x: f64,
    pub y: f64,
}

impl RelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Absolute pixel position on an image of `width × height`.
    #[inline]
    pub fn to_pixels(self, width: f64, height: f64) -> (f64, f64) {
        (self.x * width, self.y * height)
    }
}

/// A printed fiducial, described by its centre.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMark {
    pub id: String,
    pub position: RelPoint,
    pub size_px: u32,
    pub expected_brightness: u8,
    pub tolerance: u8,
}

/// Exactly four marks per margin, each side ordered top to bottom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMarks {
    pub left_side: [AlignmentMark; 4],
    pub right_side: [AlignmentMark; 4],
}

impl AlignmentMarks {
    /// Left marks first, then right marks.
    pub fn iter(&self) -> impl Iterator<Item = &AlignmentMark> {
        self.left_side.iter().chain(self.right_side.iter())
    }

    pub fn get(&self, id: &str) -> Option<&AlignmentMark> {
        self.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.left_side.len() + self.right_side.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutStructure {
    /// Numbering flows down a column, then wraps to the next one.
    #[default]
    Continuous,
    /// One column, questions grouped by subject and section.
    SubjectInColumn,
}

impl fmt::Display for LayoutStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutStructure::Continuous => f.write_str("continuous"),
            LayoutStructure::SubjectInColumn => f.write_str("subject_in_column"),
        }
    }
}

impl FromStr for LayoutStructure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continuous" => Ok(LayoutStructure::Continuous),
            "subject_in_column" => Ok(LayoutStructure::SubjectInColumn),
            other => Err(format!(
                "unknown layout structure '{other}' (expected continuous or subject_in_column)"
            )),
        }
    }
}

/// One question row on the sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionSlot {
    pub number: u32,
    pub question_type: QuestionType,
    pub options: Vec<char>,
    /// Question marker; bubbles are placed relative to it.
    pub marker: RelPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionLayout {
    pub structure: LayoutStructure,
    pub start: RelPoint,
    pub columns: u32,
    pub questions_per_column: u32,
    pub column_width: f64,
    pub row_height: f64,
    /// Marker to first bubble centre.
    pub bubble_offset: RelPoint,
    /// Horizontal pitch between neighbouring bubbles.
    pub bubble_spacing: f64,
    pub bubble_radius_px: u32,
    /// Option set used for questions of unrecognized type.
    pub option_letters: Vec<char>,
    pub questions: Vec<QuestionSlot>,
}

/// Question range and anchor of one section in a `subject_in_column` layout.
///
/// An empty section has `end_question == start_question - 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionMapping {
    pub subject: String,
    pub section: String,
    pub start_question: u32,
    pub end_question: u32,
    pub question_count: u32,
    pub anchor: RelPoint,
    pub question_type: QuestionType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Last calibration applied to this template.
///
/// `matrix` is stored as plain rows so an externally edited record still
/// loads; the mapper falls back to untransformed points when it is malformed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub matrix: Vec<Vec<f64>>,
    #[serde(default)]
    pub model: TransformModel,
    pub image_width: u32,
    pub image_height: u32,
    pub calibration_accuracy: f64,
    pub alignment_quality: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_residual_px: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSystem {
    /// Mark centres in nominal sheet pixels.
    pub reference_points: Vec<ReferencePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationRecord>,
}

/// Nominal centre of one bubble.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NominalBubble {
    pub question_number: u32,
    pub option: char,
    pub position: RelPoint,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Nominal answer-sheet layout for one exam.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub exam_name: String,
    /// Geometry profile that produced this layout.
    pub profile_id: String,
    pub paper_size: PaperSize,
    pub dpi: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub total_questions: u32,
    pub alignment_marks: AlignmentMarks,
    pub question_layout: QuestionLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_mapping: Option<Vec<SectionMapping>>,
    pub coordinate_system: CoordinateSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_coordinates: Option<Vec<NominalBubble>>,
    pub spec_fingerprint: String,
    #[serde(default)]
    pub sealed: bool,
}

impl Template {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn question(&self, number: u32) -> Option<&QuestionSlot> {
        self.question_layout
            .questions
            .iter()
            .find(|q| q.number == number)
    }

    /// Every bubble centre, computed from the question slots.
    pub fn nominal_bubbles(&self) -> Vec<NominalBubble> {
        let layout = &self.question_layout;
        let mut out = Vec::new();
        for q in &layout.questions {
            for (j, &option) in q.options.iter().enumerate() {
                out.push(NominalBubble {
                    question_number: q.number,
                    option,
                    position: RelPoint::new(
                        q.marker.x + layout.bubble_offset.x + j as f64 * layout.bubble_spacing,
                        q.marker.y + layout.bubble_offset.y,
                    ),
                    question_type: q.question_type.clone(),
                    subject: q.subject.clone(),
                    section: q.section.clone(),
                });
            }
        }
        out
    }

    /// Store the nominal bubbles in `question_coordinates`.
    pub fn with_question_coordinates(mut self) -> Self {
        self.question_coordinates = Some(self.nominal_bubbles());
        self
    }

    /// Cached bubbles when present, otherwise freshly computed ones.
    pub fn bubbles(&self) -> Cow<'_, [NominalBubble]> {
        match &self.question_coordinates {
            Some(cached) => Cow::Borrowed(cached),
            None => Cow::Owned(self.nominal_bubbles()),
        }
    }

    /// Freeze the layout once the sheet has been printed.
    pub fn seal(&mut self) {
        self.sealed = true;
    }
}
