//! Absolute bubble coordinates on a scan.

use answer_sheet_core::TransformMatrix;
use answer_sheet_layout::{LayoutStructure, PaperSize, QuestionType, RelPoint, Template};
use log::warn;
use serde::{Deserialize, Serialize};

/// One answer bubble in image pixels, as handed to the fill reader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BubbleCoordinate {
    pub question_number: u32,
    pub option: char,
    pub x: i32,
    pub y: i32,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPixel {
    pub id: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapMetadata {
    pub exam_name: String,
    pub profile_id: String,
    pub paper_size: PaperSize,
    pub structure: LayoutStructure,
    pub total_questions: u32,
    pub image_width: u32,
    pub image_height: u32,
    /// A non-identity transform was applied.
    pub transformed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateMap {
    pub bubble_coordinates: Vec<BubbleCoordinate>,
    pub alignment_marks: Vec<MarkPixel>,
    pub metadata: MapMetadata,
}

impl CoordinateMap {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Bubbles of one question, in option order.
    pub fn question(&self, number: u32) -> impl Iterator<Item = &BubbleCoordinate> {
        self.bubble_coordinates
            .iter()
            .filter(move |b| b.question_number == number)
    }
}

/// Relative point to absolute pixel, through `matrix` when one is given.
///
/// Falls back to the untransformed pixel when the projection is not finite.
fn project(p: RelPoint, matrix: Option<&TransformMatrix>, w: f64, h: f64) -> (i32, i32) {
    let (x, y) = p.to_pixels(w, h);
    let (x, y) = matrix.and_then(|m| m.apply(x, y)).unwrap_or((x, y));
    (x.round() as i32, y.round() as i32)
}

/// Map every bubble and mark of `template` onto a `width × height` scan.
///
/// `matrix_rows` may come straight from storage. Missing or short rows are
/// not an error: points are then returned untransformed.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip(template, matrix_rows),
        fields(exam = %template.exam_name)
    )
)]
pub fn map_coordinates(
    template: &Template,
    matrix_rows: &[Vec<f64>],
    image_width: u32,
    image_height: u32,
) -> CoordinateMap {
    let matrix = TransformMatrix::from_rows(matrix_rows);
    if matrix.is_none() {
        warn!(
            "malformed transform ({} rows); mapping untransformed",
            matrix_rows.len()
        );
    }
    build(template, matrix.as_ref(), image_width, image_height)
}

/// Same as [`map_coordinates`] with an already validated matrix.
pub fn map_with_transform(
    template: &Template,
    matrix: &TransformMatrix,
    image_width: u32,
    image_height: u32,
) -> CoordinateMap {
    build(template, Some(matrix), image_width, image_height)
}

/// Nominal coordinates at the template's own resolution.
pub fn preview_map(template: &Template) -> CoordinateMap {
    build(template, None, template.width_px, template.height_px)
}

/// Coordinates through the calibration stored on the template.
///
/// Uncalibrated templates give the preview map.
pub fn map_calibrated(template: &Template) -> CoordinateMap {
    match &template.coordinate_system.calibration {
        Some(cal) => map_coordinates(template, &cal.matrix, cal.image_width, cal.image_height),
        None => preview_map(template),
    }
}

fn build(
    template: &Template,
    matrix: Option<&TransformMatrix>,
    image_width: u32,
    image_height: u32,
) -> CoordinateMap {
    let (w, h) = (image_width as f64, image_height as f64);
    let bubble_coordinates = template
        .bubbles()
        .iter()
        .map(|b| {
            let (x, y) = project(b.position, matrix, w, h);
            BubbleCoordinate {
                question_number: b.question_number,
                option: b.option,
                x,
                y,
                question_type: b.question_type.clone(),
                subject: b.subject.clone(),
                section: b.section.clone(),
            }
        })
        .collect();
    let alignment_marks = template
        .alignment_marks
        .iter()
        .map(|m| {
            let (x, y) = project(m.position, matrix, w, h);
            MarkPixel {
                id: m.id.clone(),
                x,
                y,
            }
        })
        .collect();

    CoordinateMap {
        bubble_coordinates,
        alignment_marks,
        metadata: MapMetadata {
            exam_name: template.exam_name.clone(),
            profile_id: template.profile_id.clone(),
            paper_size: template.paper_size,
            structure: template.question_layout.structure,
            total_questions: template.total_questions,
            image_width,
            image_height,
            transformed: matrix.is_some_and(|m| *m != TransformMatrix::identity()),
        },
    }
}
