//! Fiducial search in the left and right margin strips.
//!
//! Each strip is covered by a raster-ordered sequence of candidate windows.
//! Windows that look like solid dark ink are folded into an arena of accepted
//! marks; a window too close to an already accepted mark is ignored, so one
//! printed mark yields one detection.

use crate::integral::{IntegralTables, Rect};
use crate::params::MarkDetectorParams;
use answer_sheet_core::{GrayImage, GrayImageView, ImageError, ImageView, PixelFormat};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MarkDetectError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
}

/// Mark found on a scan, in image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedMark {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn prefix(self) -> char {
        match self {
            Side::Left => 'L',
            Side::Right => 'R',
        }
    }
}

/// Marks found on one scan, each side sorted top to bottom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkDetection {
    pub left: Vec<DetectedMark>,
    pub right: Vec<DetectedMark>,
    pub image_width: usize,
    pub image_height: usize,
    /// `detected / expected`, in `[0, 1]`.
    pub calibration_quality: f64,
}

impl MarkDetection {
    pub fn total(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// Left marks first, then right marks.
    pub fn marks(&self) -> impl Iterator<Item = &DetectedMark> {
        self.left.iter().chain(self.right.iter())
    }

    pub fn to_vec(&self) -> Vec<DetectedMark> {
        self.marks().cloned().collect()
    }
}

/// `detected / expected`, clamped to `[0, 1]`.
pub fn calibration_quality(detected: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (detected as f64 / expected as f64).min(1.0)
}

/// Locate the alignment marks on a decoded scan.
///
/// Finding nothing is not an error: the result is simply empty and its
/// quality reflects it. Only unusable buffers and parameters fail.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip(image, params),
        fields(width = image.width, height = image.height)
    )
)]
pub fn detect_alignment_marks(
    image: &ImageView<'_>,
    params: &MarkDetectorParams,
) -> Result<MarkDetection, MarkDetectError> {
    image.validate()?;
    params.validate().map_err(MarkDetectError::InvalidParams)?;

    let converted: GrayImage;
    let gray = match image.format {
        PixelFormat::Gray8 => GrayImageView {
            width: image.width,
            height: image.height,
            data: image.data,
        },
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
            converted = image.to_gray();
            converted.view()
        }
    };

    let left = strip(&gray, Side::Left, params);
    let right = strip(&gray, Side::Right, params);
    let (left, right) = scan_both(&gray, &left, &right, params);

    let quality = calibration_quality(left.len() + right.len(), params.expected_marks);
    debug!(
        "found {} left / {} right marks (quality {:.2})",
        left.len(),
        right.len(),
        quality
    );
    Ok(MarkDetection {
        left,
        right,
        image_width: image.width,
        image_height: image.height,
        calibration_quality: quality,
    })
}

#[cfg(feature = "rayon")]
fn scan_both(
    gray: &GrayImageView<'_>,
    left: &Strip,
    right: &Strip,
    params: &MarkDetectorParams,
) -> (Vec<DetectedMark>, Vec<DetectedMark>) {
    rayon::join(
        || scan_strip(gray, left, params),
        || scan_strip(gray, right, params),
    )
}

#[cfg(not(feature = "rayon"))]
fn scan_both(
    gray: &GrayImageView<'_>,
    left: &Strip,
    right: &Strip,
    params: &MarkDetectorParams,
) -> (Vec<DetectedMark>, Vec<DetectedMark>) {
    (
        scan_strip(gray, left, params),
        scan_strip(gray, right, params),
    )
}

/// Window origins are taken from `bounds`; windows may extend past it.
#[derive(Clone, Copy, Debug)]
struct Strip {
    side: Side,
    bounds: Rect,
}

fn strip(gray: &GrayImageView<'_>, side: Side, params: &MarkDetectorParams) -> Strip {
    let [fx0, fx1] = match side {
        Side::Left => params.left_strip,
        Side::Right => params.right_strip,
    };
    let [fy0, fy1] = params.vertical_range;
    let (w, h) = (gray.width as f64, gray.height as f64);
    Strip {
        side,
        bounds: Rect {
            x0: (fx0 * w).floor() as usize,
            y0: (fy0 * h).floor() as usize,
            x1: (fx1 * w).floor() as usize,
            y1: (fy1 * h).floor() as usize,
        },
    }
}

/// Window accepted as a mark, or the refined mark itself.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    cx: f64,
    cy: f64,
    confidence: f32,
}

/// Raster-ordered window rectangles with origins inside `bounds`.
fn candidate_windows(bounds: Rect, window: usize, step: usize) -> impl Iterator<Item = Rect> {
    (bounds.y0..bounds.y1).step_by(step).flat_map(move |y| {
        (bounds.x0..bounds.x1).step_by(step).map(move |x| Rect {
            x0: x,
            y0: y,
            x1: x + window,
            y1: y + window,
        })
    })
}

fn score_window(
    tables: &IntegralTables,
    image: &Rect,
    window: &Rect,
    params: &MarkDetectorParams,
) -> Option<Candidate> {
    let coverage = window.clip(image).area() as f64 / window.area() as f64;
    if coverage < params.min_coverage as f64 {
        return None;
    }
    let sums = tables.sums(window);
    let dark_ratio = sums.dark_ratio();
    let uniformity = 1.0 / (1.0 + sums.variance().sqrt() / 100.0);
    let accepted = dark_ratio >= params.min_dark_ratio as f64
        && sums.mean() < params.brightness_ceiling() as f64
        && uniformity > params.min_uniformity as f64;
    accepted.then(|| Candidate {
        cx: (window.x0 + window.x1) as f64 / 2.0,
        cy: (window.y0 + window.y1) as f64 / 2.0,
        confidence: (dark_ratio * uniformity) as f32,
    })
}

/// `dark_ratio × uniformity` of a window centred on `(cx, cy)`.
fn centred_confidence(tables: &IntegralTables, cx: f64, cy: f64, window: usize) -> f32 {
    let half = window as f64 / 2.0;
    let x0 = (cx - half).round().max(0.0) as usize;
    let y0 = (cy - half).round().max(0.0) as usize;
    let sums = tables.sums(&Rect {
        x0,
        y0,
        x1: x0 + window,
        y1: y0 + window,
    });
    (sums.dark_ratio() / (1.0 + sums.variance().sqrt() / 100.0)) as f32
}

/// Centroid of dark pixels in a box of half-size `radius` around `(cx, cy)`.
fn dark_centroid(
    gray: &GrayImageView<'_>,
    cx: f64,
    cy: f64,
    radius: f64,
    dark_threshold: u8,
) -> Option<(f64, f64)> {
    let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;
    let x0 = clamp((cx - radius).floor(), gray.width);
    let x1 = clamp((cx + radius).ceil() + 1.0, gray.width);
    let y0 = clamp((cy - radius).floor(), gray.height);
    let y1 = clamp((cy + radius).ceil() + 1.0, gray.height);

    let (mut sx, mut sy, mut n) = (0.0, 0.0, 0u64);
    for y in y0..y1 {
        for x in x0..x1 {
            if gray.get(x, y) < dark_threshold {
                sx += x as f64 + 0.5;
                sy += y as f64 + 0.5;
                n += 1;
            }
        }
    }
    (n > 0).then(|| (sx / n as f64, sy / n as f64))
}

/// Re-centre on the dark blob; the second pass recovers rows the first box
/// clipped when the accepted window sat on the mark's edge.
fn refine_centroid(
    gray: &GrayImageView<'_>,
    cx: f64,
    cy: f64,
    radius: f64,
    dark_threshold: u8,
) -> (f64, f64) {
    (0..2).fold((cx, cy), |(x, y), _| {
        dark_centroid(gray, x, y, radius, dark_threshold).unwrap_or((x, y))
    })
}

fn scan_strip(
    gray: &GrayImageView<'_>,
    strip: &Strip,
    params: &MarkDetectorParams,
) -> Vec<DetectedMark> {
    let image = Rect {
        x0: 0,
        y0: 0,
        x1: gray.width,
        y1: gray.height,
    };
    let bounds = strip.bounds.clip(&image);
    if bounds.area() == 0 {
        return Vec::new();
    }
    let region = Rect {
        x1: bounds.x1 + params.window_px,
        y1: bounds.y1 + params.window_px,
        ..bounds
    }
    .clip(&image);
    let tables = IntegralTables::build(gray, region, params.dark_threshold);
    let d = params.dedup_distance_px;

    let mut arena: Vec<Candidate> = candidate_windows(bounds, params.window_px, params.step_px)
        .filter_map(|w| score_window(&tables, &image, &w, params))
        .fold(Vec::new(), |mut accepted, c| {
            let taken = accepted
                .iter()
                .any(|a| (a.cx - c.cx).abs() < d && (a.cy - c.cy).abs() < d);
            if !taken {
                let (cx, cy) = refine_centroid(gray, c.cx, c.cy, d, params.dark_threshold);
                let confidence = centred_confidence(&tables, cx, cy, params.window_px);
                accepted.push(Candidate { cx, cy, confidence });
            }
            accepted
        });

    if arena.len() > params.max_marks_per_strip {
        debug!(
            "{:?} strip: keeping {} of {} candidates",
            strip.side,
            params.max_marks_per_strip,
            arena.len()
        );
        arena.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        arena.truncate(params.max_marks_per_strip);
    }
    arena.sort_by(|a, b| a.cy.total_cmp(&b.cy));

    arena
        .into_iter()
        .enumerate()
        .map(|(i, c)| DetectedMark {
            id: format!("{}{}", strip.side.prefix(), i + 1),
            x: c.cx,
            y: c.cy,
            confidence: Some(c.confidence),
        })
        .collect()
}
