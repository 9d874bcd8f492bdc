use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Which family of transform produced a [`TransformMatrix`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformModel {
    /// No correction; the scan is treated as already aligned.
    Identity,
    /// Scale about the origin from the first matched mark.
    SingleAnchor,
    /// Per-axis scale and translation fitted over all matched marks.
    ScaleTranslate,
    /// Full 6-dof affine fitted over all matched marks.
    #[default]
    Affine,
    /// 8-dof projective fit (corrects keystone from handheld photos).
    Homography,
}

impl TransformModel {
    /// Minimum number of matched marks the model needs.
    pub fn min_pairs(self) -> usize {
        match self {
            TransformModel::Identity => 0,
            TransformModel::SingleAnchor => 1,
            TransformModel::ScaleTranslate => 2,
            TransformModel::Affine => 3,
            TransformModel::Homography => 4,
        }
    }

    /// Next simpler model to try when this one is under-determined.
    pub fn downgrade(self) -> TransformModel {
        match self {
            TransformModel::Homography => TransformModel::Affine,
            TransformModel::Affine => TransformModel::ScaleTranslate,
            TransformModel::ScaleTranslate => TransformModel::SingleAnchor,
            TransformModel::SingleAnchor | TransformModel::Identity => TransformModel::Identity,
        }
    }
}

const DEGENERATE_DET: f64 = 1e-9;
const MIN_W: f64 = 1e-12;

/// 3×3 planar transform from nominal sheet pixels to scanned-image pixels.
///
/// Affine models keep the last row at `[0, 0, 1]`; homographies use all nine
/// entries. Points are mapped projectively, which reduces to
/// `x' = m00*x + m01*y + m02`, `y' = m10*x + m11*y + m12` for affine rows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformMatrix {
    pub m: Matrix3<f64>,
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformMatrix {
    pub fn new(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Axis-aligned `[[sx,0,tx],[0,sy,ty],[0,0,1]]`.
    pub fn scale_translate(sx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Self::new(Matrix3::new(
            sx, 0.0, tx, //
            0.0, sy, ty, //
            0.0, 0.0, 1.0,
        ))
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.m[(0, 0)], self.m[(0, 1)], self.m[(0, 2)]],
            [self.m[(1, 0)], self.m[(1, 1)], self.m[(1, 2)]],
            [self.m[(2, 0)], self.m[(2, 1)], self.m[(2, 2)]],
        ]
    }

    /// Parse loosely-typed rows, e.g. a matrix read back from persistence.
    ///
    /// Two rows are accepted and completed with `[0, 0, 1]`. Returns `None`
    /// when rows are missing or short, or a value is not finite.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        if rows.len() < 2 {
            return None;
        }
        let mut out = [[0.0, 0.0, 1.0]; 3];
        for (r, row) in rows.iter().take(3).enumerate() {
            if row.len() < 3 {
                return None;
            }
            for c in 0..3 {
                if !row[c].is_finite() {
                    return None;
                }
                out[r][c] = row[c];
            }
        }
        Some(Self::from_array(out))
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.to_array().iter().map(|r| r.to_vec()).collect()
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }

    /// `true` when the matrix cannot be trusted to map points.
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || self.m.determinant().abs() < DEGENERATE_DET
    }

    /// `true` when the last row is `[0, 0, 1]`.
    pub fn is_affine(&self) -> bool {
        self.m[(2, 0)] == 0.0 && self.m[(2, 1)] == 0.0 && self.m[(2, 2)] == 1.0
    }

    /// Map a point. Returns `None` on a vanishing projective scale.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let v = self.m * Vector3::new(x, y, 1.0);
        let w = v[2];
        if !w.is_finite() || w.abs() < MIN_W {
            return None;
        }
        let (px, py) = (v[0] / w, v[1] / w);
        (px.is_finite() && py.is_finite()).then_some((px, py))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.m.try_inverse().map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn scale_translate_maps_points() {
        let t = TransformMatrix::scale_translate(2.0, 0.5, 10.0, -4.0);
        let (x, y) = t.apply(3.0, 8.0).expect("finite");
        assert_relative_eq!(x, 16.0);
        assert_relative_eq!(y, 0.0);
        assert!(t.is_affine());
        assert!(!t.is_degenerate());
    }

    #[test]
    fn rows_round_trip() {
        let t = TransformMatrix::scale_translate(1.1, 0.9, 3.0, 4.0);
        let back = TransformMatrix::from_rows(&t.to_rows()).expect("valid rows");
        assert_eq!(back, t);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(TransformMatrix::from_rows(&[]).is_none());
        assert!(TransformMatrix::from_rows(&[vec![1.0, 0.0, 0.0]]).is_none());
        assert!(TransformMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0, 0.0]]).is_none());
        assert!(
            TransformMatrix::from_rows(&[vec![f64::NAN, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).is_none()
        );
    }

    #[test]
    fn two_rows_are_completed_as_affine() {
        let t = TransformMatrix::from_rows(&[vec![2.0, 0.0, 1.0], vec![0.0, 2.0, 1.0]])
            .expect("affine rows");
        assert!(t.is_affine());
        assert_eq!(t.apply(1.0, 1.0), Some((3.0, 3.0)));
    }

    #[test]
    fn downgrade_chain_ends_at_identity() {
        let mut model = TransformModel::Homography;
        let mut seen = vec![model];
        while model != TransformModel::Identity {
            model = model.downgrade();
            seen.push(model);
        }
        assert_eq!(
            seen,
            vec![
                TransformModel::Homography,
                TransformModel::Affine,
                TransformModel::ScaleTranslate,
                TransformModel::SingleAnchor,
                TransformModel::Identity,
            ]
        );
    }

    #[test]
    fn zero_scale_is_degenerate() {
        assert!(TransformMatrix::scale_translate(0.0, 1.0, 0.0, 0.0).is_degenerate());
    }

    #[test]
    fn vanishing_w_yields_none() {
        let t = TransformMatrix::from_array([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(t.apply(0.0, 5.0).is_none());
    }
}
