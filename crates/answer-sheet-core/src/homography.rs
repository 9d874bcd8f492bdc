use crate::{GrayImage, GrayImageView, TransformMatrix};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector};

/// Similarity that moves a point set to its centroid and scales the mean
/// radius to `sqrt(2)`. Conditions the DLT system.
struct Conditioning {
    forward: Matrix3<f64>,
    points: Vec<Point2<f64>>,
}

impl Conditioning {
    fn of(pts: &[Point2<f64>]) -> Self {
        let n = pts.len().max(1) as f64;
        let centroid = pts.iter().fold(Point2::origin(), |acc, p| acc + p.coords / n);
        let radius = pts.iter().map(|p| (*p - centroid).norm()).sum::<f64>() / n;
        let s = if radius > 1e-12 {
            std::f64::consts::SQRT_2 / radius
        } else {
            1.0
        };
        let forward = Matrix3::new(
            s, 0.0, -s * centroid.x, //
            0.0, s, -s * centroid.y, //
            0.0, 0.0, 1.0,
        );
        let points = pts
            .iter()
            .map(|p| Point2::from((*p - centroid) * s))
            .collect();
        Self { forward, points }
    }
}

/// Undo both conditionings and scale so that `h[2][2] == 1`.
fn uncondition(
    hn: Matrix3<f64>,
    src: &Conditioning,
    dst: &Conditioning,
) -> Option<TransformMatrix> {
    let h = dst.forward.try_inverse()? * hn * src.forward;
    let w = h[(2, 2)];
    if w.abs() < 1e-12 {
        return None;
    }
    Some(TransformMatrix::new(h / w))
}

/// The two DLT equations for `(x, y) -> (u, v)`, over all nine entries of H.
fn dlt_equations(p: Point2<f64>, q: Point2<f64>) -> [[f64; 9]; 2] {
    let (x, y, u, v) = (p.x, p.y, q.x, q.y);
    [
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
        [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
    ]
}

/// Estimate H with `dst ~ H * src` from at least 4 correspondences.
///
/// Four pairs are solved exactly; more use a least-squares DLT (smallest
/// right singular vector) on conditioned coordinates.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<TransformMatrix> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (
        <&[Point2<f64>; 4]>::try_from(src),
        <&[Point2<f64>; 4]>::try_from(dst),
    ) {
        return homography_from_4pt(s, d);
    }

    let cs = Conditioning::of(src);
    let cd = Conditioning::of(dst);
    let rows: Vec<f64> = cs
        .points
        .iter()
        .zip(&cd.points)
        .flat_map(|(&p, &q)| dlt_equations(p, q))
        .flatten()
        .collect();
    let a = DMatrix::from_row_slice(2 * src.len(), 9, &rows);

    let v_t = a.svd(false, true).v_t?;
    let h = v_t.row(v_t.nrows().checked_sub(1)?);
    let hn = Matrix3::from_iterator(h.iter().copied()).transpose();
    uncondition(hn, &cs, &cd)
}

/// Exact H with `dst ~ H * src` from four correspondences in matching order.
pub fn homography_from_4pt(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Option<TransformMatrix> {
    let cs = Conditioning::of(src);
    let cd = Conditioning::of(dst);

    // Fix h22 = 1: the last DLT column moves to the right-hand side.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (&p, &q)) in cs.points.iter().zip(&cd.points).enumerate() {
        for (r, eq) in dlt_equations(p, q).iter().enumerate() {
            let row = 2 * k + r;
            for c in 0..8 {
                a[(row, c)] = eq[c];
            }
            b[row] = -eq[8];
        }
    }
    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );
    uncondition(hn, &cs, &cd)
}

/// Resample `src` into an `out_w × out_h` raster where `dst = dst_from_src(src)`.
///
/// Each output pixel centre is pulled back through the inverse transform and
/// sampled with nearest-neighbour; pixels falling outside `src` get `fill`.
/// Returns `None` when the transform is not invertible.
pub fn warp_gray(
    src: &GrayImageView<'_>,
    dst_from_src: &TransformMatrix,
    out_w: usize,
    out_h: usize,
    fill: u8,
) -> Option<GrayImage> {
    let src_from_dst = dst_from_src.inverse()?;
    let mut out = GrayImage::filled(out_w, out_h, fill);

    for y in 0..out_h {
        for x in 0..out_w {
            let Some((sx, sy)) = src_from_dst.apply(x as f64 + 0.5, y as f64 + 0.5) else {
                continue;
            };
            let (ix, iy) = (sx.floor(), sy.floor());
            if ix < 0.0 || iy < 0.0 || ix >= src.width as f64 || iy >= src.height as f64 {
                continue;
            }
            out.data[y * out_w + x] = src.get(ix as usize, iy as usize);
        }
    }

    Some(out)
}
