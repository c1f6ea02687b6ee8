//! Page outline search: edges → contours → 4-vertex polygon approximation.

use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;

use crate::config::ContourParams;
use crate::geometry::{polygon_area, ImagePoint, ImageSpace, Quad};

use super::MarkerNotFoundError;

/// Largest convex quadrilateral outline in the image.
pub(crate) fn locate_page(
    img: &GrayImage,
    params: &ContourParams,
) -> Result<Quad<ImageSpace>, MarkerNotFoundError> {
    let (w, h) = img.dimensions();
    let blurred = if params.blur_sigma > 0.0 {
        gaussian_blur_f32(img, params.blur_sigma)
    } else {
        img.clone()
    };
    let mut edges = canny(&blurred, params.canny_low, params.canny_high);
    if params.dilate_radius > 0 {
        edges = dilate(&edges, Norm::LInf, params.dilate_radius);
    }

    let contours = find_contours::<i32>(&edges);
    let min_area = params.min_area_frac * w as f64 * h as f64;
    let mut best: Option<(f64, Quad<ImageSpace>)> = None;
    let mut n_quads = 0usize;

    for contour in &contours {
        if contour.points.len() < 4 {
            continue;
        }
        let pts: Vec<[f64; 2]> = contour
            .points
            .iter()
            .map(|p| [p.x as f64, p.y as f64])
            .collect();
        // Cheap reject before simplification.
        if polygon_area(&pts) < min_area {
            continue;
        }
        let eps = params.approx_epsilon_frac * closed_perimeter(&pts);
        let poly = approx_closed_polygon(&pts, eps);
        if poly.len() != 4 {
            continue;
        }
        let quad = Quad::from_unordered([
            ImagePoint::from_array(poly[0]),
            ImagePoint::from_array(poly[1]),
            ImagePoint::from_array(poly[2]),
            ImagePoint::from_array(poly[3]),
        ]);
        if quad.validate().is_err() {
            continue;
        }
        n_quads += 1;
        let area = quad.area();
        if area >= min_area && best.as_ref().map_or(true, |(a, _)| area > *a) {
            best = Some((area, quad));
        }
    }

    tracing::debug!(
        "contour search: {} contours, {} quadrilaterals",
        contours.len(),
        n_quads
    );
    best.map(|(_, q)| q)
        .ok_or(MarkerNotFoundError::NoQuadrilateral {
            contours: contours.len(),
        })
}

pub(crate) fn closed_perimeter(pts: &[[f64; 2]]) -> f64 {
    let n = pts.len();
    (0..n)
        .map(|i| {
            let a = pts[i];
            let b = pts[(i + 1) % n];
            (b[0] - a[0]).hypot(b[1] - a[1])
        })
        .sum()
}

fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let len2 = abx * abx + aby * aby;
    if len2 < 1e-24 {
        return (p[0] - a[0]).hypot(p[1] - a[1]);
    }
    let t = (((p[0] - a[0]) * abx + (p[1] - a[1]) * aby) / len2).clamp(0.0, 1.0);
    (p[0] - (a[0] + t * abx)).hypot(p[1] - (a[1] + t * aby))
}

/// Douglas–Peucker on an open polyline; endpoints are always kept.
fn simplify_open(pts: &[[f64; 2]], epsilon: f64) -> Vec<[f64; 2]> {
    let n = pts.len();
    if n <= 2 {
        return pts.to_vec();
    }
    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;
    let mut stack = vec![(0usize, n - 1)];
    while let Some((a, b)) = stack.pop() {
        if b <= a + 1 {
            continue;
        }
        let (idx, dist) = (a + 1..b)
            .map(|i| (i, point_segment_distance(pts[i], pts[a], pts[b])))
            .fold((a, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if dist > epsilon {
            keep[idx] = true;
            stack.push((a, idx));
            stack.push((idx, b));
        }
    }
    (0..n).filter(|&i| keep[i]).map(|i| pts[i]).collect()
}

/// Douglas–Peucker on a closed contour.
///
/// The ring is split at the point farthest from the centroid and the point
/// farthest from that one, both chains are simplified, and vertices that
/// still lie within `epsilon` of their neighbours' chord are dropped.
pub(crate) fn approx_closed_polygon(pts: &[[f64; 2]], epsilon: f64) -> Vec<[f64; 2]> {
    let n = pts.len();
    if n < 3 {
        return pts.to_vec();
    }
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n as f64;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n as f64;
    let dist2 = |p: [f64; 2], q: [f64; 2]| (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2);

    let start = (0..n)
        .max_by(|&i, &j| dist2(pts[i], [cx, cy]).total_cmp(&dist2(pts[j], [cx, cy])))
        .unwrap_or(0);
    let ring: Vec<[f64; 2]> = pts[start..].iter().chain(&pts[..start]).copied().collect();
    let far = (1..n)
        .max_by(|&i, &j| dist2(ring[i], ring[0]).total_cmp(&dist2(ring[j], ring[0])))
        .unwrap_or(n / 2);

    let first = simplify_open(&ring[..=far], epsilon);
    let mut second_chain: Vec<[f64; 2]> = ring[far..].to_vec();
    second_chain.push(ring[0]);
    let second = simplify_open(&second_chain, epsilon);

    let mut poly = first;
    poly.extend_from_slice(&second[1..second.len() - 1]);

    loop {
        if poly.len() <= 3 {
            break;
        }
        let m = poly.len();
        let removable = (0..m).find(|&i| {
            let prev = poly[(i + m - 1) % m];
            let next = poly[(i + 1) % m];
            point_segment_distance(poly[i], prev, next) < epsilon
        });
        match removable {
            Some(i) => {
                poly.remove(i);
            }
            None => break,
        }
    }
    poly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fill_quad, warp_sheet_onto_canvas, render_sheet, SheetSpec};
    use image::Luma;

    /// Dense boundary samples of a polygon.
    fn sample_polygon(corners: &[[f64; 2]], step: f64) -> Vec<[f64; 2]> {
        let mut out = Vec::new();
        for i in 0..corners.len() {
            let a = corners[i];
            let b = corners[(i + 1) % corners.len()];
            let len = (b[0] - a[0]).hypot(b[1] - a[1]);
            let k = (len / step).ceil() as usize;
            for s in 0..k {
                let t = s as f64 / k as f64;
                out.push([a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])]);
            }
        }
        out
    }

    #[test]
    fn square_outline_reduces_to_four_corners() {
        let corners = [[10.0, 10.0], [110.0, 12.0], [108.0, 115.0], [8.0, 110.0]];
        let mut pts = sample_polygon(&corners, 1.0);
        // Start mid-edge so the split points are not trivially corners.
        pts.rotate_left(37);
        let eps = 0.02 * closed_perimeter(&pts);
        let poly = approx_closed_polygon(&pts, eps);
        assert_eq!(poly.len(), 4, "{:?}", poly);
        for c in corners {
            assert!(poly.iter().any(|p| (p[0] - c[0]).hypot(p[1] - c[1]) < 1.5));
        }
    }

    #[test]
    fn pentagon_is_not_a_quad() {
        let corners = [[50.0, 0.0], [100.0, 40.0], [80.0, 100.0], [20.0, 100.0], [0.0, 40.0]];
        let pts = sample_polygon(&corners, 1.0);
        let poly = approx_closed_polygon(&pts, 0.02 * closed_perimeter(&pts));
        assert_eq!(poly.len(), 5);
    }

    #[test]
    fn finds_bright_page_on_dark_background() {
        let mut img = GrayImage::from_pixel(300, 260, Luma([30]));
        let corners = [[40.0, 30.0], [260.0, 45.0], [250.0, 230.0], [35.0, 220.0]];
        fill_quad(&mut img, corners, 240);
        let quad = locate_page(&img, &ContourParams::default()).unwrap();
        for (got, want) in quad.to_arrays().iter().zip(corners) {
            assert!(
                (got[0] - want[0]).hypot(got[1] - want[1]) < 4.0,
                "{:?} vs {:?}",
                got,
                want
            );
        }
    }

    #[test]
    fn uniform_image_has_no_page() {
        let img = GrayImage::from_pixel(200, 200, Luma([200]));
        let err = locate_page(&img, &ContourParams::default()).unwrap_err();
        assert!(matches!(err, MarkerNotFoundError::NoQuadrilateral { .. }));
    }

    #[test]
    fn page_with_bubbles_still_resolves_outline() {
        let spec = SheetSpec::five_by_five();
        let sheet = render_sheet(&spec, &[vec![0], vec![1], vec![2], vec![3], vec![4]]);
        let corners = [[40.0, 50.0], [470.0, 30.0], [490.0, 480.0], [30.0, 470.0]];
        let photo = warp_sheet_onto_canvas(&sheet, corners, (520, 520), 30);
        let quad = locate_page(&photo, &ContourParams::default()).unwrap();
        for (got, want) in quad.to_arrays().iter().zip(corners) {
            assert!((got[0] - want[0]).hypot(got[1] - want[1]) < 4.0);
        }
    }
}
