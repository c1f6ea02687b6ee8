//! Registration marks searched around their expected template positions.

use image::GrayImage;

use crate::config::FiducialParams;
use crate::geometry::{ImagePoint, ImageSpace, PixelRect, Quad};

use super::MarkerNotFoundError;

/// Expected mark positions as fractions of the image size, TL, TR, BR, BL.
pub type FiducialAnchors = [[f64; 2]; 4];

const CORNER_NAMES: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];

/// Dark-pixel centroid of one search window.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowHit {
    pub center: ImagePoint,
    /// 1 when the centroid sits on the expected position, falling to 0 at
    /// the nominal window corner; 0 when the window held no dark pixel.
    pub confidence: f32,
    pub dark_pixels: usize,
}

/// Window of `window_frac` of the image on each side, centered on an anchor.
pub(crate) fn search_window(anchor: [f64; 2], (w, h): (u32, u32), window_frac: f64) -> PixelRect {
    PixelRect::around(
        [anchor[0] * w as f64, anchor[1] * h as f64],
        [0.5 * window_frac * w as f64, 0.5 * window_frac * h as f64],
        w,
        h,
    )
}

pub(crate) fn scan_window(
    img: &GrayImage,
    window: PixelRect,
    expected: ImagePoint,
    half_diag: f64,
    dark_threshold: u8,
) -> WindowHit {
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    let mut n = 0usize;
    for y in window.y..window.y + window.height {
        for x in window.x..window.x + window.width {
            if img.get_pixel(x, y)[0] < dark_threshold {
                sx += x as f64;
                sy += y as f64;
                n += 1;
            }
        }
    }
    if n == 0 {
        return WindowHit {
            center: expected,
            confidence: 0.0,
            dark_pixels: 0,
        };
    }
    let centroid = ImagePoint::new(sx / n as f64, sy / n as f64);
    let confidence = if half_diag > 0.0 {
        (1.0 - centroid.distance(expected) / half_diag).clamp(0.0, 1.0) as f32
    } else {
        1.0
    };
    WindowHit {
        center: centroid,
        confidence,
        dark_pixels: n,
    }
}

/// Mark centroids ordered TL, TR, BR, BL plus per-corner confidence.
///
/// Empty windows fall back to the expected position with confidence 0;
/// only an image with no dark pixel in any window is an error.
pub(crate) fn locate_fiducials(
    img: &GrayImage,
    anchors: &FiducialAnchors,
    params: &FiducialParams,
) -> Result<(Quad<ImageSpace>, [f32; 4]), MarkerNotFoundError> {
    let (w, h) = img.dimensions();
    let half_diag = 0.5 * params.window_frac * (w as f64).hypot(h as f64);
    let hits: Vec<WindowHit> = anchors
        .iter()
        .map(|&anchor| {
            scan_window(
                img,
                search_window(anchor, (w, h), params.window_frac),
                ImagePoint::new(anchor[0] * w as f64, anchor[1] * h as f64),
                half_diag,
                params.dark_threshold,
            )
        })
        .collect();

    if hits.iter().all(|hit| hit.dark_pixels == 0) {
        return Err(MarkerNotFoundError::NoDarkPixels {
            threshold: params.dark_threshold,
        });
    }

    for (hit, name) in hits.iter().zip(CORNER_NAMES) {
        if hit.dark_pixels == 0 {
            tracing::warn!("no fiducial found in {} window, using expected position", name);
        } else if hit.confidence < params.warn_confidence {
            tracing::warn!(
                "{} fiducial far from its expected position (confidence {:.2})",
                name,
                hit.confidence
            );
        }
    }

    let quad = Quad::new([hits[0].center, hits[1].center, hits[2].center, hits[3].center]);
    let confidence = [
        hits[0].confidence,
        hits[1].confidence,
        hits[2].confidence,
        hits[3].confidence,
    ];
    Ok((quad, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fill_rect;
    use image::Luma;

    /// Marks 10% in from each image corner.
    const INSET: FiducialAnchors = [[0.1, 0.1], [0.9, 0.1], [0.9, 0.9], [0.1, 0.9]];

    #[test]
    fn centroids_of_four_marks() {
        let mut img = GrayImage::from_pixel(200, 300, Luma([250]));
        fill_rect(&mut img, 14, 26, 9, 9, 0); // center (18, 30)
        fill_rect(&mut img, 178, 24, 9, 9, 0); // (182, 28)
        fill_rect(&mut img, 178, 268, 5, 5, 0); // (180, 270)
        fill_rect(&mut img, 16, 267, 7, 7, 0); // (19, 270)
        let (quad, conf) = locate_fiducials(&img, &INSET, &FiducialParams::default()).unwrap();
        let c = quad.to_arrays();
        assert_eq!(c[0], [18.0, 30.0]);
        assert_eq!(c[1], [182.0, 28.0]);
        assert_eq!(c[2], [180.0, 270.0]);
        assert_eq!(c[3], [19.0, 270.0]);
        assert!(conf.iter().all(|&v| v > 0.8 && v <= 1.0));
    }

    #[test]
    fn window_is_centered_on_the_anchor() {
        let r = search_window([0.1, 0.9], (200, 300), 0.12);
        assert_eq!(r, PixelRect::new(8, 252, 24, 36));
    }

    #[test]
    fn content_near_the_image_corner_is_ignored() {
        // Dark blocks near the image corners, away from the expected marks.
        let mut img = GrayImage::from_pixel(200, 300, Luma([255]));
        fill_rect(&mut img, 17, 28, 3, 3, 0); // mark at (18, 29)
        fill_rect(&mut img, 0, 290, 10, 10, 0);
        fill_rect(&mut img, 35, 0, 10, 10, 0);
        let (quad, conf) = locate_fiducials(&img, &INSET, &FiducialParams::default()).unwrap();
        assert_eq!(quad.to_arrays()[0], [18.0, 29.0]);
        assert_eq!(quad.to_arrays()[3], [20.0, 270.0]);
        assert_eq!(conf[3], 0.0);
    }

    #[test]
    fn empty_window_falls_back_to_expected_position() {
        let mut img = GrayImage::from_pixel(100, 100, Luma([255]));
        fill_rect(&mut img, 9, 9, 3, 3, 0);
        fill_rect(&mut img, 89, 9, 3, 3, 0);
        fill_rect(&mut img, 89, 89, 3, 3, 0);
        let (quad, conf) = locate_fiducials(&img, &INSET, &FiducialParams::default()).unwrap();
        assert_eq!(quad.to_arrays()[3], [10.0, 90.0]);
        assert_eq!(conf[3], 0.0);
        assert!(conf[0] > 0.0);
    }

    #[test]
    fn mark_on_expected_position_has_full_confidence() {
        let mut img = GrayImage::from_pixel(100, 100, Luma([255]));
        fill_rect(&mut img, 6, 6, 3, 3, 0);
        let hit = scan_window(
            &img,
            PixelRect::new(0, 0, 15, 15),
            ImagePoint::new(7.0, 7.0),
            10.0,
            100,
        );
        assert_eq!(hit.center.to_array(), [7.0, 7.0]);
        assert!((hit.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn blank_image_is_an_error() {
        let img = GrayImage::from_pixel(100, 100, Luma([255]));
        let err = locate_fiducials(&img, &INSET, &FiducialParams::default()).unwrap_err();
        assert!(matches!(err, MarkerNotFoundError::NoDarkPixels { threshold: 100 }));
    }
}
