//! Nominal-to-scan transform from matched alignment marks.

use answer_sheet_core::{estimate_homography, TransformMatrix, TransformModel};
use answer_sheet_layout::{AlignmentMarks, CalibrationRecord};
use answer_sheet_marks::{calibration_quality, DetectedMark};
use log::{debug, warn};
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParams {
    /// Requested model; downgraded when there are too few marks for it.
    pub model: TransformModel,
    /// Below this many detected marks the scan is treated as aligned.
    pub min_detected: usize,
    /// Confidence assumed for marks that carry none.
    pub default_confidence: f32,
    pub expected_marks: usize,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            model: TransformModel::Affine,
            min_detected: 2,
            default_confidence: 0.8,
            expected_marks: 8,
        }
    }
}

/// Why the identity transform was returned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FallbackReason {
    TooFewMarks { detected: usize, required: usize },
    NoMatchingIds,
    DegenerateFit,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::TooFewMarks { detected, required } => {
                write!(f, "only {detected} marks detected, {required} required")
            }
            FallbackReason::NoMatchingIds => {
                f.write_str("no detected mark matches a template mark")
            }
            FallbackReason::DegenerateFit => f.write_str("every model produced a degenerate fit"),
        }
    }
}

/// Transform plus quality figures for one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub matrix: TransformMatrix,
    /// Model actually used.
    pub model: TransformModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgraded_from: Option<TransformModel>,
    /// Mark the single-anchor model was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<String>,
    pub matched_marks: Vec<String>,
    pub detected_marks: usize,
    /// `min(detected / expected, 1)`.
    pub calibration_accuracy: f64,
    /// Mean mark confidence.
    pub alignment_quality: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_residual_px: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    /// Fewer marks than expected, or identity fallback; a re-scan may help.
    pub low_quality: bool,
}

impl CalibrationResult {
    /// Record for storing on the template.
    pub fn to_record(&self, image_width: u32, image_height: u32) -> CalibrationRecord {
        CalibrationRecord {
            matrix: self.matrix.to_rows(),
            model: self.model,
            image_width,
            image_height,
            calibration_accuracy: self.calibration_accuracy,
            alignment_quality: self.alignment_quality,
            rms_residual_px: self.rms_residual_px,
        }
    }
}

/// Nominal/detected pixel pair for one mark id.
#[derive(Clone, Debug)]
struct MarkPair {
    id: String,
    nominal: Point2<f64>,
    detected: Point2<f64>,
}

/// Fit the transform from template mark positions to detected marks.
///
/// Nominal positions are the template's relative mark centres scaled to the
/// scan size. Never fails; the identity is returned with a
/// [`FallbackReason`] when nothing better can be fitted.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "info",
        skip(template_marks, detected, params),
        fields(detected = detected.len(), model = ?params.model)
    )
)]
pub fn estimate_transform(
    template_marks: &AlignmentMarks,
    detected: &[DetectedMark],
    image_width: u32,
    image_height: u32,
    params: &TransformParams,
) -> CalibrationResult {
    let (w, h) = (image_width as f64, image_height as f64);
    let accuracy = calibration_quality(detected.len(), params.expected_marks);
    let alignment_quality = mean_confidence(detected, params.default_confidence);

    let pairs = pair_marks(template_marks, detected, w, h);

    let base = CalibrationResult {
        matrix: TransformMatrix::identity(),
        model: TransformModel::Identity,
        downgraded_from: None,
        anchor_id: None,
        matched_marks: pairs.iter().map(|p| p.id.clone()).collect(),
        detected_marks: detected.len(),
        calibration_accuracy: accuracy,
        alignment_quality,
        rms_residual_px: None,
        fallback: None,
        low_quality: true,
    };

    let fallback = |reason: FallbackReason| {
        warn!("calibration fallback to identity: {reason}");
        CalibrationResult {
            fallback: Some(reason),
            ..base.clone()
        }
    };

    if detected.len() < params.min_detected {
        return fallback(FallbackReason::TooFewMarks {
            detected: detected.len(),
            required: params.min_detected,
        });
    }
    if pairs.is_empty() {
        return fallback(FallbackReason::NoMatchingIds);
    }

    let mut model = params.model;
    while model.min_pairs() > pairs.len() {
        model = model.downgrade();
    }
    let fitted = loop {
        if model == TransformModel::Identity {
            break None;
        }
        match fit(model, &pairs) {
            Some(m) if m.is_finite() && !m.is_degenerate() => break Some(m),
            _ => {
                debug!("{model:?} fit rejected, downgrading");
                model = model.downgrade();
            }
        }
    };
    let Some(matrix) = fitted else {
        return fallback(FallbackReason::DegenerateFit);
    };

    let rms = rms_residual(&matrix, &pairs);
    debug!(
        "{model:?} fit over {} marks, rms {:.3}px",
        pairs.len(),
        rms.unwrap_or(f64::NAN)
    );
    CalibrationResult {
        matrix,
        model,
        downgraded_from: (model != params.model).then_some(params.model),
        anchor_id: (model == TransformModel::SingleAnchor).then(|| pairs[0].id.clone()),
        rms_residual_px: rms,
        low_quality: detected.len() < params.expected_marks,
        ..base
    }
}

/// Pair detected marks with template marks.
///
/// The detector labels marks by rank within a strip, so one missed mark
/// shifts every label below it. Marks of each side are therefore assigned by
/// position: the order-preserving choice of nominal marks with the smallest
/// total squared distance. Other ids are paired by name.
fn pair_marks(
    template_marks: &AlignmentMarks,
    detected: &[DetectedMark],
    w: f64,
    h: f64,
) -> Vec<MarkPair> {
    let mut pairs = Vec::with_capacity(detected.len());
    for (prefix, side) in [("L", &template_marks.left_side), ("R", &template_marks.right_side)] {
        let mut found: Vec<&DetectedMark> =
            detected.iter().filter(|d| d.id.starts_with(prefix)).collect();
        found.sort_by(|a, b| a.y.total_cmp(&b.y));
        let nominal: Vec<Point2<f64>> = side
            .iter()
            .map(|m| {
                let (x, y) = m.position.to_pixels(w, h);
                Point2::new(x, y)
            })
            .collect();
        let Some(slots) = ordered_assignment(&found, &nominal) else {
            continue;
        };
        for (d, slot) in found.into_iter().zip(slots) {
            if d.id != side[slot].id {
                debug!("mark {} re-identified as {}", d.id, side[slot].id);
            }
            pairs.push(MarkPair {
                id: side[slot].id.clone(),
                nominal: nominal[slot],
                detected: Point2::new(d.x, d.y),
            });
        }
    }
    for d in detected
        .iter()
        .filter(|d| !d.id.starts_with('L') && !d.id.starts_with('R'))
    {
        if let Some(t) = template_marks.get(&d.id) {
            let (x, y) = t.position.to_pixels(w, h);
            pairs.push(MarkPair {
                id: d.id.clone(),
                nominal: Point2::new(x, y),
                detected: Point2::new(d.x, d.y),
            });
        }
    }
    pairs
}

/// Increasing nominal indices, one per detection (both sorted top to
/// bottom), minimising the summed squared distance. `None` when there are
/// more detections than nominal marks or nothing to assign.
fn ordered_assignment(found: &[&DetectedMark], nominal: &[Point2<f64>]) -> Option<Vec<usize>> {
    let (k, n) = (found.len(), nominal.len());
    if k == 0 || k > n || n >= usize::BITS as usize {
        return None;
    }
    let mut best: Option<(f64, Vec<usize>)> = None;
    for mask in 0u32..(1 << n) {
        if mask.count_ones() as usize != k {
            continue;
        }
        let slots: Vec<usize> = (0..n).filter(|i| mask & (1 << i) != 0).collect();
        let cost: f64 = found
            .iter()
            .zip(&slots)
            .map(|(d, &i)| (Point2::new(d.x, d.y) - nominal[i]).norm_squared())
            .sum();
        if best.as_ref().is_none_or(|(c, _)| cost < *c) {
            best = Some((cost, slots));
        }
    }
    best.map(|(_, slots)| slots)
}

fn mean_confidence(detected: &[DetectedMark], default: f32) -> f64 {
    if detected.is_empty() {
        return 0.0;
    }
    let sum: f64 = detected
        .iter()
        .map(|d| d.confidence.unwrap_or(default) as f64)
        .sum();
    sum / detected.len() as f64
}

fn fit(model: TransformModel, pairs: &[MarkPair]) -> Option<TransformMatrix> {
    match model {
        TransformModel::Identity => Some(TransformMatrix::identity()),
        TransformModel::SingleAnchor => single_anchor(&pairs[0]),
        TransformModel::ScaleTranslate => scale_translate(pairs),
        TransformModel::Affine => affine(pairs),
        TransformModel::Homography => {
            let src: Vec<Point2<f64>> = pairs.iter().map(|p| p.nominal).collect();
            let dst: Vec<Point2<f64>> = pairs.iter().map(|p| p.detected).collect();
            estimate_homography(&src, &dst)
        }
    }
}

/// Scale about the origin so the anchor's nominal point lands on its detection.
fn single_anchor(anchor: &MarkPair) -> Option<TransformMatrix> {
    let (nx, ny) = (anchor.nominal.x, anchor.nominal.y);
    if nx.abs() < f64::EPSILON || ny.abs() < f64::EPSILON {
        return None;
    }
    let sx = anchor.detected.x / nx;
    let sy = anchor.detected.y / ny;
    let tx = anchor.detected.x - nx * sx;
    let ty = anchor.detected.y - ny * sy;
    Some(TransformMatrix::scale_translate(sx, sy, tx, ty))
}

/// Least-squares `u = s·x + t` for one axis; `None` without spread in `x`.
fn axis_fit(xs: &[f64], us: &[f64]) -> (Option<f64>, f64, f64) {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let mu = us.iter().sum::<f64>() / n;
    let var: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let cov: f64 = xs.iter().zip(us).map(|(x, u)| (x - mx) * (u - mu)).sum();
    let scale = (var > 1e-6).then(|| cov / var);
    (scale, mx, mu)
}

/// Per-axis scale and translation over all pairs.
///
/// An axis whose nominal coordinates do not vary borrows the other axis'
/// scale.
fn scale_translate(pairs: &[MarkPair]) -> Option<TransformMatrix> {
    let xs: Vec<f64> = pairs.iter().map(|p| p.nominal.x).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.nominal.y).collect();
    let us: Vec<f64> = pairs.iter().map(|p| p.detected.x).collect();
    let vs: Vec<f64> = pairs.iter().map(|p| p.detected.y).collect();
    let (sx, mx, mu) = axis_fit(&xs, &us);
    let (sy, my, mv) = axis_fit(&ys, &vs);
    let (sx, sy) = match (sx, sy) {
        (Some(sx), Some(sy)) => (sx, sy),
        (Some(s), None) | (None, Some(s)) => (s, s),
        (None, None) => return None,
    };
    Some(TransformMatrix::scale_translate(
        sx,
        sy,
        mu - sx * mx,
        mv - sy * my,
    ))
}

/// Six-parameter affine over all pairs, solved on centred coordinates.
fn affine(pairs: &[MarkPair]) -> Option<TransformMatrix> {
    let n = pairs.len() as f64;
    let centroid = |f: fn(&MarkPair) -> Point2<f64>| {
        pairs
            .iter()
            .map(|p| f(p).coords)
            .fold(Vector2::zeros(), |a, b| a + b)
            / n
    };
    let src_c = centroid(|p| p.nominal);
    let dst_c = centroid(|p| p.detected);

    let mut m = Matrix2::<f64>::zeros();
    let mut bu = Vector2::<f64>::zeros();
    let mut bv = Vector2::<f64>::zeros();
    for p in pairs {
        let d = p.nominal.coords - src_c;
        let t = p.detected.coords - dst_c;
        m += d * d.transpose();
        bu += d * t.x;
        bv += d * t.y;
    }
    // Collinear marks leave `m` rank-deficient.
    let scale = m.trace();
    if scale <= 0.0 || m.determinant() / (scale * scale) < 1e-9 {
        return None;
    }
    let inv = m.try_inverse()?;
    let row_u = inv * bu;
    let row_v = inv * bv;
    let tx = dst_c.x - row_u.dot(&src_c);
    let ty = dst_c.y - row_v.dot(&src_c);
    Some(TransformMatrix::from_array([
        [row_u.x, row_u.y, tx],
        [row_v.x, row_v.y, ty],
        [0.0, 0.0, 1.0],
    ]))
}

fn rms_residual(matrix: &TransformMatrix, pairs: &[MarkPair]) -> Option<f64> {
    let mut sum = 0.0;
    for p in pairs {
        let (x, y) = matrix.apply(p.nominal.x, p.nominal.y)?;
        sum += (x - p.detected.x).powi(2) + (y - p.detected.y).powi(2);
    }
    Some((sum / pairs.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_sheet_layout::{
        generate_for_paper, ExamSpec, LayoutOptions, PaperSize, Template,
    };
    use approx::assert_abs_diff_eq;

    const W: u32 = 2480;
    const H: u32 = 3508;

    fn template() -> Template {
        generate_for_paper(&ExamSpec::default(), PaperSize::A4, 300, &LayoutOptions::default())
            .expect("a4")
    }

    fn observe(t: &Template, truth: &TransformMatrix, ids: &[&str]) -> Vec<DetectedMark> {
        ids.iter()
            .map(|id| {
                let m = t.alignment_marks.get(id).expect("mark id");
                let (x, y) = m.position.to_pixels(W as f64, H as f64);
                let (x, y) = truth.apply(x, y).expect("finite");
                DetectedMark {
                    id: id.to_string(),
                    x,
                    y,
                    confidence: Some(0.9),
                }
            })
            .collect()
    }

    const ALL: [&str; 8] = ["L1", "L2", "L3", "L4", "R1", "R2", "R3", "R4"];

    #[test]
    fn affine_recovers_rotation_and_shift() {
        let t = template();
        let (c, s) = (0.02f64.cos(), 0.02f64.sin());
        let truth = TransformMatrix::from_array([
            [0.95 * c, -0.95 * s, 31.0],
            [0.95 * s, 0.95 * c, -12.0],
            [0.0, 0.0, 1.0],
        ]);
        let det = observe(&t, &truth, &ALL);
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &TransformParams::default());
        assert_eq!(res.model, TransformModel::Affine);
        assert!(!res.low_quality);
        assert_abs_diff_eq!(res.calibration_accuracy, 1.0);
        assert_abs_diff_eq!(res.alignment_quality, 0.9, epsilon = 1e-6);
        assert!(res.rms_residual_px.expect("rms") < 1e-6);
        let a = res.matrix.to_array();
        let b = truth.to_array();
        for r in 0..3 {
            for col in 0..3 {
                assert_abs_diff_eq!(a[r][col], b[r][col], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn single_anchor_reproduces_its_detected_position() {
        let t = template();
        let det = vec![
            DetectedMark {
                id: "L2".into(),
                x: 71.0,
                y: 1150.0,
                confidence: None,
            },
            DetectedMark {
                id: "R3".into(),
                x: 2400.0,
                y: 1990.0,
                confidence: None,
            },
        ];
        let params = TransformParams {
            model: TransformModel::SingleAnchor,
            ..TransformParams::default()
        };
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &params);
        assert_eq!(res.model, TransformModel::SingleAnchor);
        assert_eq!(res.anchor_id.as_deref(), Some("L2"));
        assert_abs_diff_eq!(res.alignment_quality, 0.8, epsilon = 1e-6);
        let anchor = t.alignment_marks.get("L2").expect("L2");
        let (nx, ny) = anchor.position.to_pixels(W as f64, H as f64);
        let (x, y) = res.matrix.apply(nx, ny).expect("finite");
        assert_abs_diff_eq!(x, 71.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 1150.0, epsilon = 1e-9);
    }

    #[test]
    fn fewer_than_two_marks_fall_back_to_identity() {
        let t = template();
        let det = observe(&t, &TransformMatrix::identity(), &["R1"]);
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &TransformParams::default());
        assert_eq!(res.matrix, TransformMatrix::identity());
        assert_eq!(res.model, TransformModel::Identity);
        assert!(res.low_quality);
        assert_eq!(
            res.fallback,
            Some(FallbackReason::TooFewMarks {
                detected: 1,
                required: 2
            })
        );
        assert_abs_diff_eq!(res.calibration_accuracy, 0.125);
    }

    #[test]
    fn unknown_ids_fall_back_to_identity() {
        let t = template();
        let det = vec![
            DetectedMark {
                id: "X1".into(),
                x: 10.0,
                y: 10.0,
                confidence: Some(1.0),
            };
            3
        ];
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &TransformParams::default());
        assert_eq!(res.fallback, Some(FallbackReason::NoMatchingIds));
        assert!(res.matched_marks.is_empty());
    }

    #[test]
    fn rank_labels_after_a_missed_mark_are_reassigned_by_position() {
        let t = template();
        let truth = TransformMatrix::scale_translate(1.01, 0.99, 6.0, -4.0);
        let mut det = observe(&t, &truth, &["L2", "L3", "L4", "R1", "R2", "R3", "R4"]);
        for (d, label) in det.iter_mut().zip(["L1", "L2", "L3"]) {
            d.id = label.to_string();
        }
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &TransformParams::default());
        assert_eq!(res.model, TransformModel::Affine);
        assert_eq!(res.matched_marks, ["L2", "L3", "L4", "R1", "R2", "R3", "R4"]);
        assert!(res.rms_residual_px.expect("rms") < 1e-6);
        assert!(res.low_quality);
        let (x, y) = res.matrix.apply(1200.0, 300.0).expect("finite");
        let (ex, ey) = truth.apply(1200.0, 300.0).expect("finite");
        assert_abs_diff_eq!(x, ex, epsilon = 1e-6);
        assert_abs_diff_eq!(y, ey, epsilon = 1e-6);
    }

    #[test]
    fn homography_downgrades_with_three_marks() {
        let t = template();
        let truth = TransformMatrix::scale_translate(1.02, 0.98, 5.0, -7.0);
        let det = observe(&t, &truth, &["L1", "L4", "R2"]);
        let params = TransformParams {
            model: TransformModel::Homography,
            ..TransformParams::default()
        };
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &params);
        assert_eq!(res.model, TransformModel::Affine);
        assert_eq!(res.downgraded_from, Some(TransformModel::Homography));
        assert!(res.low_quality);
        assert_abs_diff_eq!(res.calibration_accuracy, 3.0 / 8.0);
    }

    #[test]
    fn collinear_marks_drop_to_scale_translate() {
        let t = template();
        let truth = TransformMatrix::scale_translate(1.05, 1.05, 3.0, 9.0);
        let det = observe(&t, &truth, &["L1", "L2", "L3", "L4"]);
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &TransformParams::default());
        assert_eq!(res.model, TransformModel::ScaleTranslate);
        let (x, y) = res.matrix.apply(1000.0, 2000.0).expect("finite");
        let (ex, ey) = truth.apply(1000.0, 2000.0).expect("finite");
        assert_abs_diff_eq!(x, ex, epsilon = 1e-6);
        assert_abs_diff_eq!(y, ey, epsilon = 1e-6);
    }

    #[test]
    fn homography_corrects_keystone() {
        let t = template();
        let truth = TransformMatrix::from_array([
            [1.01, 0.02, 15.0],
            [-0.01, 0.99, 8.0],
            [2e-6, 4e-6, 1.0],
        ]);
        let det = observe(&t, &truth, &ALL);
        let params = TransformParams {
            model: TransformModel::Homography,
            ..TransformParams::default()
        };
        let res = estimate_transform(&t.alignment_marks, &det, W, H, &params);
        assert_eq!(res.model, TransformModel::Homography);
        assert!(res.rms_residual_px.expect("rms") < 1e-3);
        let (x, y) = res.matrix.apply(1200.0, 1700.0).expect("finite");
        let (ex, ey) = truth.apply(1200.0, 1700.0).expect("finite");
        assert_abs_diff_eq!(x, ex, epsilon = 1e-3);
        assert_abs_diff_eq!(y, ey, epsilon = 1e-3);
    }
}
