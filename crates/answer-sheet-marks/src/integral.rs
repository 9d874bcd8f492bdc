//! Summed-area tables for O(1) window statistics.

use answer_sheet_core::GrayImageView;

/// Pixel rectangle `[x0, x1) × [y0, y1)` in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Rect {
    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Intersection with `other`; empty rectangles collapse to zero size.
    pub fn clip(&self, other: &Rect) -> Rect {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        Rect {
            x0,
            y0,
            x1: self.x1.min(other.x1).max(x0),
            y1: self.y1.min(other.y1).max(y0),
        }
    }
}

/// Sums over a window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct WindowSums {
    pub count: u64,
    pub dark: u64,
    pub sum: u64,
    pub sum_sq: u64,
}

impl WindowSums {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum as f64 / self.count as f64
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum as f64 / n;
        (self.sum_sq as f64 / n - mean * mean).max(0.0)
    }

    pub fn dark_ratio(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.dark as f64 / self.count as f64
    }
}

/// Dark-pixel count, intensity sum and squared-intensity sum tables over one
/// region of an image.
pub(crate) struct IntegralTables {
    region: Rect,
    stride: usize,
    dark: Vec<u64>,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralTables {
    pub fn build(img: &GrayImageView<'_>, region: Rect, dark_threshold: u8) -> Self {
        let w = region.width();
        let h = region.height();
        let stride = w + 1;
        let len = stride * (h + 1);
        let mut dark = vec![0u64; len];
        let mut sum = vec![0u64; len];
        let mut sum_sq = vec![0u64; len];

        for ry in 0..h {
            let (mut row_dark, mut row_sum, mut row_sq) = (0u64, 0u64, 0u64);
            for rx in 0..w {
                let v = img.get(region.x0 + rx, region.y0 + ry) as u64;
                row_dark += (v < dark_threshold as u64) as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (ry + 1) * stride + rx + 1;
                let above = ry * stride + rx + 1;
                dark[idx] = dark[above] + row_dark;
                sum[idx] = sum[above] + row_sum;
                sum_sq[idx] = sum_sq[above] + row_sq;
            }
        }

        Self {
            region,
            stride,
            dark,
            sum,
            sum_sq,
        }
    }

    /// Sums over `rect`, clipped to the table region.
    pub fn sums(&self, rect: &Rect) -> WindowSums {
        let r = rect.clip(&self.region);
        if r.area() == 0 {
            return WindowSums::default();
        }
        let (ax, ay) = (r.x0 - self.region.x0, r.y0 - self.region.y0);
        let (bx, by) = (r.x1 - self.region.x0, r.y1 - self.region.y0);
        let at = |t: &[u64]| {
            t[by * self.stride + bx] + t[ay * self.stride + ax]
                - t[ay * self.stride + bx]
                - t[by * self.stride + ax]
        };
        WindowSums {
            count: r.area() as u64,
            dark: at(&self.dark),
            sum: at(&self.sum),
            sum_sq: at(&self.sum_sq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_sheet_core::GrayImage;

    #[test]
    fn sums_match_direct_computation() {
        let mut img = GrayImage::filled(20, 12, 200);
        for y in 3..7 {
            for x in 5..9 {
                img.put(x, y, 10);
            }
        }
        let full = Rect { x0: 0, y0: 0, x1: 20, y1: 12 };
        let tables = IntegralTables::build(&img.view(), full, 80);

        let w = tables.sums(&Rect { x0: 4, y0: 2, x1: 10, y1: 8 });
        assert_eq!(w.count, 36);
        assert_eq!(w.dark, 16);
        assert_eq!(w.sum, 16 * 10 + 20 * 200);
        assert_eq!(w.sum_sq, 16 * 100 + 20 * 40_000);
    }

    #[test]
    fn windows_are_clipped_to_region() {
        let img = GrayImage::filled(10, 10, 0);
        let region = Rect { x0: 2, y0: 2, x1: 10, y1: 10 };
        let tables = IntegralTables::build(&img.view(), region, 80);
        let w = tables.sums(&Rect { x0: 7, y0: 7, x1: 12, y1: 12 });
        assert_eq!(w.count, 9);
        assert_eq!(w.dark_ratio(), 1.0);
        assert_eq!(w.variance(), 0.0);
    }
}
