//! Coordinate-space-tagged points and quadrilaterals.
//!
//! Raw photo pixels and template pixels are both plain `f64` pairs, so the
//! space is carried as a zero-sized type parameter: a [`Quad<ImageSpace>`]
//! cannot be passed where a [`Quad<TemplateSpace>`] is expected.

use std::marker::PhantomData;

/// Pixel coordinates of the raw (photographed or scanned) image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageSpace;

/// Pixel coordinates of the rectified template page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateSpace;

/// A 2D point in coordinate space `S`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point<S> {
    pub x: f64,
    pub y: f64,
    space: PhantomData<S>,
}

pub type ImagePoint = Point<ImageSpace>;
pub type TemplatePoint = Point<TemplateSpace>;

impl<S> Point<S> {
    pub const fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    pub fn from_array(xy: [f64; 2]) -> Self {
        Self::new(xy[0], xy[1])
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.x, self.y]
    }

    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Signed doubled area of triangle `(a, b, c)`; positive when `a→b→c` turns
/// clockwise in image coordinates (y down).
pub(crate) fn cross3(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Whether `a`, `b`, `c` are collinear relative to the scale of the triangle.
pub(crate) fn nearly_collinear(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> bool {
    let ab = (b[0] - a[0]).hypot(b[1] - a[1]);
    let bc = (c[0] - b[0]).hypot(c[1] - b[1]);
    let ca = (a[0] - c[0]).hypot(a[1] - c[1]);
    let longest = ab.max(bc).max(ca);
    if longest < 1e-9 {
        return true;
    }
    // Twice the triangle height over the longest side, relative to that side.
    cross3(a, b, c).abs() / (longest * longest) < 1e-6
}

/// Why a set of four corners cannot form a usable quadrilateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadDefect {
    NonFinite,
    Collinear,
    NonConvex,
}

impl std::fmt::Display for QuadDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFinite => write!(f, "corner coordinates are not finite"),
            Self::Collinear => write!(f, "three corners are collinear"),
            Self::NonConvex => write!(f, "corners do not form a convex quadrilateral"),
        }
    }
}

/// Four corners ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad<S> {
    corners: [Point<S>; 4],
}

impl<S: Copy> Quad<S> {
    /// Wrap corners that are already in TL, TR, BR, BL order.
    pub fn new(corners: [Point<S>; 4]) -> Self {
        Self { corners }
    }

    /// Order four arbitrary corners.
    ///
    /// TL has the smallest `x + y`, BR the largest; TR has the smallest
    /// `y - x`, BL the largest. This is the usual rule for pages rotated by
    /// less than 45 degrees.
    pub fn from_unordered(points: [Point<S>; 4]) -> Self {
        let by = |key: fn(&Point<S>) -> f64, max: bool| -> Point<S> {
            let mut best = points[0];
            for p in &points[1..] {
                let better = if max { key(p) > key(&best) } else { key(p) < key(&best) };
                if better {
                    best = *p;
                }
            }
            best
        };
        let tl = by(|p| p.x + p.y, false);
        let br = by(|p| p.x + p.y, true);
        let tr = by(|p| p.y - p.x, false);
        let bl = by(|p| p.y - p.x, true);
        Self::new([tl, tr, br, bl])
    }

    /// Axis-aligned rectangle `[0, w] × [0, h]` as a quad.
    pub fn from_rect(width: f64, height: f64) -> Self {
        Self::new([
            Point::new(0.0, 0.0),
            Point::new(width, 0.0),
            Point::new(width, height),
            Point::new(0.0, height),
        ])
    }

    pub fn corners(&self) -> &[Point<S>; 4] {
        &self.corners
    }

    pub fn to_arrays(&self) -> [[f64; 2]; 4] {
        self.corners.map(|p| p.to_array())
    }

    /// Check that the corners are finite, pairwise non-collinear and convex.
    pub fn validate(&self) -> Result<(), QuadDefect> {
        if !self.corners.iter().all(|p| p.is_finite()) {
            return Err(QuadDefect::NonFinite);
        }
        let c = self.to_arrays();
        for skip in 0..4 {
            let tri: Vec<[f64; 2]> = (0..4).filter(|&i| i != skip).map(|i| c[i]).collect();
            if nearly_collinear(tri[0], tri[1], tri[2]) {
                return Err(QuadDefect::Collinear);
            }
        }
        let signs: Vec<f64> = (0..4)
            .map(|i| cross3(c[i], c[(i + 1) % 4], c[(i + 2) % 4]).signum())
            .collect();
        if signs.iter().any(|&s| s != signs[0]) {
            return Err(QuadDefect::NonConvex);
        }
        Ok(())
    }

    /// Absolute polygon area (shoelace).
    pub fn area(&self) -> f64 {
        polygon_area(&self.to_arrays())
    }
}

/// Absolute area of a simple polygon.
pub(crate) fn polygon_area(pts: &[[f64; 2]]) -> f64 {
    let n = pts.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        acc += a[0] * b[1] - b[0] * a[1];
    }
    0.5 * acc.abs()
}

/// Axis-aligned integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection with an image of size `w × h`; `None` when empty.
    pub fn clip_to(&self, w: u32, h: u32) -> Option<PixelRect> {
        let x0 = self.x.min(w);
        let y0 = self.y.min(h);
        let x1 = self.x.saturating_add(self.width).min(w);
        let y1 = self.y.saturating_add(self.height).min(h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Rectangle of half-size `half` around `center`, clipped to `w × h`.
    ///
    /// Never empty for a non-empty image: a center outside the image snaps
    /// to the nearest edge pixel.
    pub fn around(center: [f64; 2], half: [f64; 2], w: u32, h: u32) -> PixelRect {
        let span = |c: f64, half: f64, size: u32| -> (u32, u32) {
            let max = size.max(1);
            let lo = ((c - half).round().max(0.0) as u32).min(max - 1);
            let hi = ((c + half).round().max(0.0) as u32).clamp(lo + 1, max);
            (lo, hi)
        };
        let (x0, x1) = span(center[0], half[0], w);
        let (y0, y1) = span(center[1], half[1], h);
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.x.saturating_add(other.width)
            && other.x < self.x.saturating_add(self.width)
            && self.y < other.y.saturating_add(other.height)
            && other.y < self.y.saturating_add(self.height)
    }

    /// Whether a disc overlaps the rectangle (bounding-box test).
    pub fn touches_disc(&self, center: [f64; 2], radius: f64) -> bool {
        center[0] + radius >= self.x as f64
            && center[0] - radius < (self.x + self.width) as f64
            && center[1] + radius >= self.y as f64
            && center[1] - radius < (self.y + self.height) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(x: f64, y: f64) -> ImagePoint {
        ImagePoint::new(x, y)
    }

    #[test]
    fn from_unordered_sorts_corners_clockwise() {
        let q = Quad::from_unordered([ip(95.0, 110.0), ip(5.0, 2.0), ip(8.0, 98.0), ip(102.0, 4.0)]);
        let c = q.to_arrays();
        assert_eq!(c[0], [5.0, 2.0]);
        assert_eq!(c[1], [102.0, 4.0]);
        assert_eq!(c[2], [95.0, 110.0]);
        assert_eq!(c[3], [8.0, 98.0]);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn validate_rejects_collinear_corners() {
        let q = Quad::new([ip(0.0, 0.0), ip(10.0, 0.0), ip(20.0, 0.0), ip(0.0, 10.0)]);
        assert_eq!(q.validate(), Err(QuadDefect::Collinear));
    }

    #[test]
    fn validate_rejects_bowtie() {
        let q = Quad::new([ip(0.0, 0.0), ip(10.0, 10.0), ip(10.0, 0.0), ip(0.0, 10.0)]);
        assert_eq!(q.validate(), Err(QuadDefect::NonConvex));
    }

    #[test]
    fn rect_area_matches() {
        let q: Quad<TemplateSpace> = Quad::from_rect(40.0, 25.0);
        assert!((q.area() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn clip_rect_to_bounds() {
        let r = PixelRect::new(90, 5, 20, 10);
        assert_eq!(r.clip_to(100, 100), Some(PixelRect::new(90, 5, 10, 10)));
        assert_eq!(PixelRect::new(120, 0, 5, 5).clip_to(100, 100), None);
    }

    #[test]
    fn window_around_point_is_clipped() {
        let r = PixelRect::around([10.0, 50.0], [20.0, 5.0], 100, 100);
        assert_eq!(r, PixelRect::new(0, 45, 30, 10));
        let edge = PixelRect::around([100.0, 100.0], [0.2, 0.2], 100, 100);
        assert_eq!(edge, PixelRect::new(99, 99, 1, 1));
    }

    #[test]
    fn rect_overlap_tests() {
        let a = PixelRect::new(0, 0, 10, 10);
        assert!(a.intersects(&PixelRect::new(9, 9, 5, 5)));
        assert!(!a.intersects(&PixelRect::new(10, 0, 5, 5)));
        assert!(a.touches_disc([14.0, 5.0], 5.0));
        assert!(!a.touches_disc([16.0, 5.0], 5.0));
    }
}
