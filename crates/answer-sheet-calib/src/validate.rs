//! Structural checks on a coordinate map before it goes downstream.

use crate::map::CoordinateMap;
use answer_sheet_layout::Template;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Alignment marks a complete map carries.
pub const EXPECTED_MARKS: usize = 8;

/// A problem that makes the map structurally invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationIssue {
    NoBubbles,
    MarkCount { found: usize },
    MissingQuestions(Vec<u32>),
    DuplicatePositions { count: usize },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::NoBubbles => f.write_str("No bubble coordinates found"),
            ValidationIssue::MarkCount { found } => {
                write!(f, "Expected {EXPECTED_MARKS} alignment marks, found {found}")
            }
            ValidationIssue::MissingQuestions(numbers) => {
                let list: Vec<String> = numbers.iter().map(u32::to_string).collect();
                write!(f, "Missing coordinates for questions: {}", list.join(", "))
            }
            ValidationIssue::DuplicatePositions { count } => {
                write!(f, "Found {count} bubbles sharing a pixel position")
            }
        }
    }
}

/// Non-blocking observations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationWarning {
    OutOfBounds { count: usize },
    OptionCountMismatch { question: u32, expected: usize, found: usize },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::OutOfBounds { count } => {
                write!(f, "{count} bubbles fall outside the image")
            }
            ValidationWarning::OptionCountMismatch {
                question,
                expected,
                found,
            } => write!(
                f,
                "Question {question} has {found} bubbles, expected {expected}"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_bubbles: usize,
    pub questions_with_coordinates: usize,
    pub average_bubbles_per_question: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub statistics: ValidationStats,
}

/// Structural issues of `map`, in check order.
pub fn check_map(map: &CoordinateMap) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let bubbles = &map.bubble_coordinates;

    if bubbles.is_empty() {
        issues.push(ValidationIssue::NoBubbles);
    }
    if map.alignment_marks.len() != EXPECTED_MARKS {
        issues.push(ValidationIssue::MarkCount {
            found: map.alignment_marks.len(),
        });
    }

    let present: BTreeSet<u32> = bubbles.iter().map(|b| b.question_number).collect();
    if let Some(&max) = present.last() {
        let missing: Vec<u32> = (1..=max).filter(|n| !present.contains(n)).collect();
        if !missing.is_empty() {
            issues.push(ValidationIssue::MissingQuestions(missing));
        }
    }

    let mut seen: HashMap<(i32, i32), usize> = HashMap::with_capacity(bubbles.len());
    for b in bubbles {
        *seen.entry((b.x, b.y)).or_default() += 1;
    }
    let duplicates: usize = seen.values().filter(|&&n| n > 1).map(|n| n - 1).sum();
    if duplicates > 0 {
        issues.push(ValidationIssue::DuplicatePositions { count: duplicates });
    }
    issues
}

fn statistics(map: &CoordinateMap) -> ValidationStats {
    let total = map.bubble_coordinates.len();
    let questions = map
        .bubble_coordinates
        .iter()
        .map(|b| b.question_number)
        .collect::<BTreeSet<_>>()
        .len();
    ValidationStats {
        total_bubbles: total,
        questions_with_coordinates: questions,
        average_bubbles_per_question: if questions == 0 {
            0.0
        } else {
            total as f64 / questions as f64
        },
    }
}

fn out_of_bounds(map: &CoordinateMap) -> Option<ValidationWarning> {
    let (w, h) = (
        map.metadata.image_width as i32,
        map.metadata.image_height as i32,
    );
    let count = map
        .bubble_coordinates
        .iter()
        .filter(|b| b.x < 0 || b.y < 0 || b.x >= w || b.y >= h)
        .count();
    (count > 0).then_some(ValidationWarning::OutOfBounds { count })
}

fn report(
    map: &CoordinateMap,
    issues: Vec<ValidationIssue>,
    warnings: Vec<ValidationWarning>,
) -> ValidationReport {
    ValidationReport {
        is_valid: issues.is_empty(),
        issues: issues.iter().map(ToString::to_string).collect(),
        warnings: warnings.iter().map(ToString::to_string).collect(),
        statistics: statistics(map),
    }
}

/// Validate a map on its own.
///
/// `is_valid` holds exactly when there are bubbles, eight marks, no
/// numbering gaps and no two bubbles on the same pixel.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip(map), fields(bubbles = map.bubble_coordinates.len()))
)]
pub fn validate_map(map: &CoordinateMap) -> ValidationReport {
    let warnings = out_of_bounds(map).into_iter().collect();
    report(map, check_map(map), warnings)
}

/// Validate a map and also compare per-question bubble counts with the
/// option sets in `template`.
pub fn validate_against_template(map: &CoordinateMap, template: &Template) -> ValidationReport {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for b in &map.bubble_coordinates {
        *counts.entry(b.question_number).or_default() += 1;
    }
    let mut warnings: Vec<ValidationWarning> = out_of_bounds(map).into_iter().collect();
    for q in &template.question_layout.questions {
        let found = counts.get(&q.number).copied().unwrap_or(0);
        if found != q.options.len() {
            warnings.push(ValidationWarning::OptionCountMismatch {
                question: q.number,
                expected: q.options.len(),
                found,
            });
        }
    }
    report(map, check_map(map), warnings)
}
