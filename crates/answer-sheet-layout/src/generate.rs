use crate::exam::{option_letters, ExamSpec, PlannedQuestion};
use crate::profile::{GeometryProfile, LayoutError, PaperSize, ProfileRegistry};
use crate::template::{
    AlignmentMark, AlignmentMarks, CoordinateSystem, LayoutStructure, QuestionLayout,
    QuestionSlot, ReferencePoint, RelPoint, SectionMapping, Template,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Caller-side layout choices; geometry comes from the profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub structure: LayoutStructure,
    /// Column count for `continuous`; `None` uses the profile default.
    pub columns: Option<u32>,
    /// Question count used when the spec has no subjects.
    pub default_question_count: Option<u32>,
    /// Options for questions whose type is not recognized.
    pub default_options: Vec<char>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            structure: LayoutStructure::Continuous,
            columns: None,
            default_question_count: None,
            default_options: option_letters(4),
        }
    }
}

/// Generate a template using the built-in profile for `(paper_size, dpi)`.
pub fn generate_for_paper(
    spec: &ExamSpec,
    paper_size: PaperSize,
    dpi: u32,
    options: &LayoutOptions,
) -> Result<Template, LayoutError> {
    let profile = ProfileRegistry::builtin().lookup(paper_size, dpi)?;
    Ok(generate_template(spec, profile, options))
}

/// Build the nominal template for `spec`.
///
/// Never fails: an empty spec yields an empty (or fallback-sized) layout and
/// unknown question types get `options.default_options`.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip(spec, profile, options),
        fields(profile = %profile.id, structure = %options.structure)
    )
)]
pub fn generate_template(
    spec: &ExamSpec,
    profile: &GeometryProfile,
    options: &LayoutOptions,
) -> Template {
    let default_options = if options.default_options.is_empty() {
        option_letters(4)
    } else {
        options.default_options.clone()
    };
    let planned = spec.plan_questions(options.default_question_count, &default_options);
    let total = planned.len() as u32;

    let page = Page::new(profile);
    let pitch = column_pitch(&planned, profile);
    let (columns, per_column, questions, mapping) = match options.structure {
        LayoutStructure::Continuous => {
            let columns = options.columns.unwrap_or(profile.default_columns).max(1);
            let per_column = total.div_ceil(columns);
            let slots = place_continuous(&planned, profile, &page, per_column, pitch);
            (columns, per_column, slots, None)
        }
        LayoutStructure::SubjectInColumn => {
            let (slots, mapping) = place_by_subject(spec, &planned, profile, &page);
            (1, total, slots, Some(mapping))
        }
    };

    debug!(
        "generated {} questions ({}, {} columns) with profile {}",
        total, options.structure, columns, profile.id
    );

    Template {
        exam_name: spec.name.clone(),
        profile_id: profile.id.clone(),
        paper_size: profile.paper_size,
        dpi: profile.dpi,
        width_px: profile.width_px,
        height_px: profile.height_px,
        total_questions: total,
        alignment_marks: alignment_marks(profile),
        question_layout: QuestionLayout {
            structure: options.structure,
            start: page.rel(profile.content_origin_px[0], profile.content_origin_px[1]),
            columns,
            questions_per_column: per_column,
            column_width: page.rel_x(pitch),
            row_height: page.rel_y(profile.row_height_px),
            bubble_offset: page.rel(profile.bubble_offset_px[0], profile.bubble_offset_px[1]),
            bubble_spacing: page.rel_x(profile.bubble_pitch_px),
            bubble_radius_px: profile.bubble_radius_px,
            option_letters: default_options,
            questions,
        },
        subject_mapping: mapping,
        coordinate_system: CoordinateSystem {
            reference_points: reference_points(profile),
            calibration: None,
        },
        question_coordinates: None,
        spec_fingerprint: spec.fingerprint(),
        sealed: false,
    }
}

/// Pixel to page-relative conversion for one profile.
struct Page {
    w: f64,
    h: f64,
}

impl Page {
    fn new(profile: &GeometryProfile) -> Self {
        Self {
            w: profile.width_px as f64,
            h: profile.height_px as f64,
        }
    }

    fn rel_x(&self, px: f64) -> f64 {
        px / self.w
    }

    fn rel_y(&self, px: f64) -> f64 {
        px / self.h
    }

    fn rel(&self, x: f64, y: f64) -> RelPoint {
        RelPoint::new(self.rel_x(x), self.rel_y(y))
    }
}

fn slot(q: &PlannedQuestion, marker: RelPoint) -> QuestionSlot {
    QuestionSlot {
        number: q.number,
        question_type: q.question_type.clone(),
        options: q.options.clone(),
        marker,
        subject: q.subject.clone(),
        section: q.section.clone(),
    }
}

/// Column-major flow: `column = (i-1) / per_column`, `row = (i-1) % per_column`.
/// Horizontal distance between column markers: the profile's column width,
/// widened so the longest option row never reaches the next column.
fn column_pitch(planned: &[PlannedQuestion], profile: &GeometryProfile) -> f64 {
    let widest = planned.iter().map(|q| q.options.len()).max().unwrap_or(0);
    let row = profile.bubble_offset_px[0] + widest as f64 * profile.bubble_pitch_px;
    if row > profile.column_width_px {
        debug!(
            "widening columns from {}px to {row}px for {widest} options",
            profile.column_width_px
        );
    }
    profile.column_width_px.max(row)
}

fn place_continuous(
    planned: &[PlannedQuestion],
    profile: &GeometryProfile,
    page: &Page,
    per_column: u32,
    pitch: f64,
) -> Vec<QuestionSlot> {
    let [ox, oy] = profile.content_origin_px;
    planned
        .iter()
        .map(|q| {
            let idx = q.number - 1;
            let column = idx / per_column;
            let row = idx % per_column;
            let x = ox + column as f64 * pitch;
            let y = oy + row as f64 * profile.row_height_px;
            slot(q, page.rel(x, y))
        })
        .collect()
}

/// Single column walk over subjects and sections.
///
/// Each section starts with a header band; the cursor then moves past its
/// rows plus `section_gap_px`, and past `subject_gap_px` after each subject.
fn place_by_subject(
    spec: &ExamSpec,
    planned: &[PlannedQuestion],
    profile: &GeometryProfile,
    page: &Page,
) -> (Vec<QuestionSlot>, Vec<SectionMapping>) {
    let [x, oy] = profile.content_origin_px;

    if spec.subjects.is_empty() {
        let slots = planned
            .iter()
            .map(|q| {
                let y = oy + (q.number - 1) as f64 * profile.row_height_px;
                slot(q, page.rel(x, y))
            })
            .collect();
        return (slots, Vec::new());
    }

    let mut slots = Vec::with_capacity(planned.len());
    let mut mapping = Vec::new();
    let mut remaining = planned.iter();
    let mut cursor = oy;
    let mut next_number = 1u32;

    for subject in &spec.subjects {
        for section in &subject.sections {
            let count = section.question_count;
            let first_row = cursor + profile.section_header_px;
            for (r, q) in remaining.by_ref().take(count as usize).enumerate() {
                let y = first_row + r as f64 * profile.row_height_px;
                slots.push(slot(q, page.rel(x, y)));
            }
            mapping.push(SectionMapping {
                subject: subject.name.clone(),
                section: section.name.clone(),
                start_question: next_number,
                end_question: next_number + count - 1,
                question_count: count,
                anchor: page.rel(x, cursor),
                question_type: section.question_type.clone(),
            });
            next_number += count;
            cursor += profile.section_header_px
                + count as f64 * profile.row_height_px
                + profile.section_gap_px;
        }
        cursor += profile.subject_gap_px;
    }
    (slots, mapping)
}

fn mark(id: String, x: f64, y: f64, profile: &GeometryProfile) -> AlignmentMark {
    AlignmentMark {
        id,
        position: RelPoint::new(x, y),
        size_px: profile.mark_size_px,
        expected_brightness: profile.mark_expected_brightness,
        tolerance: profile.mark_tolerance,
    }
}

fn alignment_marks(profile: &GeometryProfile) -> AlignmentMarks {
    let [left_x, right_x] = profile.mark_x_fracs;
    let ys = profile.mark_y_fracs;
    AlignmentMarks {
        left_side: std::array::from_fn(|i| mark(format!("L{}", i + 1), left_x, ys[i], profile)),
        right_side: std::array::from_fn(|i| mark(format!("R{}", i + 1), right_x, ys[i], profile)),
    }
}

fn reference_points(profile: &GeometryProfile) -> Vec<ReferencePoint> {
    let w = profile.width_px as f64;
    let h = profile.height_px as f64;
    alignment_marks(profile)
        .iter()
        .map(|m| ReferencePoint {
            id: m.id.clone(),
            x: m.position.x * w,
            y: m.position.y * h,
        })
        .collect()
}
