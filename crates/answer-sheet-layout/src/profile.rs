//! Versioned sheet geometry, keyed by `(paper size, dpi)`.
//!
//! A profile fixes where the alignment marks sit and how questions are
//! pitched on the page. Printed sheets and their templates must come from
//! the same profile, so templates store [`GeometryProfile::id`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaperSize::A4 => f.write_str("a4"),
            PaperSize::Letter => f.write_str("letter"),
        }
    }
}

impl FromStr for PaperSize {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a4" => Ok(PaperSize::A4),
            "letter" => Ok(PaperSize::Letter),
            other => Err(LayoutError::UnknownPaperSize(other.to_string())),
        }
    }
}

/// Layout and profile errors.
#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("unknown paper size '{0}' (expected a4 or letter)")]
    UnknownPaperSize(String),
    #[error("no geometry profile for {paper_size} at {dpi} dpi")]
    UnknownProfile { paper_size: PaperSize, dpi: u32 },
    #[error("invalid geometry profile '{id}': {reason}")]
    InvalidProfile { id: String, reason: String },
    #[error("duplicate geometry profile for {paper_size} at {dpi} dpi")]
    DuplicateProfile { paper_size: PaperSize, dpi: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Pixel geometry of one sheet format at one resolution.
///
/// Mark positions are page fractions of the mark centre; every other length
/// is in pixels at `dpi`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryProfile {
    pub id: String,
    pub paper_size: PaperSize,
    pub dpi: u32,
    pub width_px: u32,
    pub height_px: u32,
    /// Horizontal centre of the left and right mark columns.
    pub mark_x_fracs: [f64; 2],
    /// Vertical centres of the four marks in each column, top to bottom.
    pub mark_y_fracs: [f64; 4],
    pub mark_size_px: u32,
    pub mark_expected_brightness: u8,
    pub mark_tolerance: u8,
    /// Top-left question marker of the first column.
    pub content_origin_px: [f64; 2],
    pub column_width_px: f64,
    pub row_height_px: f64,
    /// Offset from a question marker to its first bubble centre.
    pub bubble_offset_px: [f64; 2],
    pub bubble_pitch_px: f64,
    pub bubble_radius_px: u32,
    pub section_header_px: f64,
    pub section_gap_px: f64,
    pub subject_gap_px: f64,
    pub default_columns: u32,
}

impl GeometryProfile {
    /// Reject profiles that cannot produce a usable sheet.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let fail = |reason: &str| {
            Err(LayoutError::InvalidProfile {
                id: self.id.clone(),
                reason: reason.to_string(),
            })
        };
        if self.width_px == 0 || self.height_px == 0 || self.dpi == 0 {
            return fail("page dimensions and dpi must be > 0");
        }
        let in_page = |f: f64| f.is_finite() && f > 0.0 && f < 1.0;
        if !self.mark_x_fracs.iter().all(|&f| in_page(f))
            || !self.mark_y_fracs.iter().all(|&f| in_page(f))
        {
            return fail("mark fractions must lie strictly inside (0, 1)");
        }
        if self.mark_x_fracs[0] >= self.mark_x_fracs[1] {
            return fail("left mark column must be left of the right one");
        }
        if self.mark_y_fracs.windows(2).any(|w| w[0] >= w[1]) {
            return fail("mark rows must be strictly increasing");
        }
        let positive = [
            self.column_width_px,
            self.row_height_px,
            self.bubble_pitch_px,
        ];
        if !positive.iter().all(|v| v.is_finite() && *v > 0.0) {
            return fail("column width, row height and bubble pitch must be > 0");
        }
        if self.mark_size_px == 0 || self.bubble_radius_px == 0 || self.default_columns == 0 {
            return fail("mark size, bubble radius and column count must be > 0");
        }
        Ok(())
    }

    pub fn key(&self) -> (PaperSize, u32) {
        (self.paper_size, self.dpi)
    }
}

fn a4_300() -> GeometryProfile {
    GeometryProfile {
        id: "a4-300dpi-v1".into(),
        paper_size: PaperSize::A4,
        dpi: 300,
        width_px: 2480,
        height_px: 3508,
        mark_x_fracs: [0.024, 0.976],
        mark_y_fracs: [0.10, 0.32, 0.56, 0.78],
        mark_size_px: 36,
        mark_expected_brightness: 20,
        mark_tolerance: 60,
        content_origin_px: [400.0, 420.0],
        column_width_px: 560.0,
        row_height_px: 64.0,
        bubble_offset_px: [90.0, 0.0],
        bubble_pitch_px: 56.0,
        bubble_radius_px: 18,
        section_header_px: 72.0,
        section_gap_px: 32.0,
        subject_gap_px: 64.0,
        default_columns: 3,
    }
}

fn letter_300() -> GeometryProfile {
    GeometryProfile {
        id: "letter-300dpi-v1".into(),
        paper_size: PaperSize::Letter,
        width_px: 2550,
        height_px: 3300,
        content_origin_px: [410.0, 400.0],
        column_width_px: 575.0,
        row_height_px: 60.0,
        ..a4_300()
    }
}

fn half_resolution(p: GeometryProfile, id: &str) -> GeometryProfile {
    let h = |v: f64| (v / 2.0).round();
    GeometryProfile {
        id: id.into(),
        dpi: p.dpi / 2,
        width_px: p.width_px / 2,
        height_px: p.height_px / 2,
        mark_size_px: p.mark_size_px / 2,
        content_origin_px: p.content_origin_px.map(h),
        column_width_px: h(p.column_width_px),
        row_height_px: h(p.row_height_px),
        bubble_offset_px: p.bubble_offset_px.map(h),
        bubble_pitch_px: h(p.bubble_pitch_px),
        bubble_radius_px: p.bubble_radius_px / 2,
        section_header_px: h(p.section_header_px),
        section_gap_px: h(p.section_gap_px),
        subject_gap_px: h(p.subject_gap_px),
        ..p
    }
}

/// Immutable set of geometry profiles, at most one per `(paper size, dpi)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileRegistry {
    profiles: Vec<GeometryProfile>,
}

impl ProfileRegistry {
    /// Build a registry, validating every profile and rejecting duplicates.
    pub fn new(profiles: Vec<GeometryProfile>) -> Result<Self, LayoutError> {
        for (i, p) in profiles.iter().enumerate() {
            p.validate()?;
            if profiles[..i].iter().any(|q| q.key() == p.key()) {
                return Err(LayoutError::DuplicateProfile {
                    paper_size: p.paper_size,
                    dpi: p.dpi,
                });
            }
        }
        Ok(Self { profiles })
    }

    /// Profiles shipped with the crate, built once per process.
    pub fn builtin() -> &'static ProfileRegistry {
        static BUILTIN: OnceLock<ProfileRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| ProfileRegistry {
            profiles: vec![
                a4_300(),
                letter_300(),
                half_resolution(a4_300(), "a4-150dpi-v1"),
                half_resolution(letter_300(), "letter-150dpi-v1"),
            ],
        })
    }

    /// Load a JSON array of profiles.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let raw = fs::read_to_string(path)?;
        let profiles: Vec<GeometryProfile> = serde_json::from_str(&raw)?;
        Self::new(profiles)
    }

    pub fn get(&self, paper_size: PaperSize, dpi: u32) -> Option<&GeometryProfile> {
        self.profiles.iter().find(|p| p.key() == (paper_size, dpi))
    }

    pub fn lookup(&self, paper_size: PaperSize, dpi: u32) -> Result<&GeometryProfile, LayoutError> {
        self.get(paper_size, dpi)
            .ok_or(LayoutError::UnknownProfile { paper_size, dpi })
    }

    pub fn by_id(&self, id: &str) -> Option<&GeometryProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn profiles(&self) -> &[GeometryProfile] {
        &self.profiles
    }
}
