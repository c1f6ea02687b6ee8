//! Shared test utilities for image-based unit tests.
//!
//! Synthetic sheets follow one convention: unfilled bubbles are light gray
//! discs (so grid inference sees center-peaked projections), marks are
//! black discs, and fiducials are black squares.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation};

use crate::geometry::{ImagePoint, ImageSpace, Quad, TemplateSpace};
use crate::homography::{projection_from, Homography};
use crate::template::{AnswerBlock, TemplateLayout};

/// Gray level of a printed, unfilled bubble (darkness ~0.12).
pub(crate) const BUBBLE_TINT: u8 = 225;

/// Fill a clipped axis-aligned rectangle.
pub(crate) fn fill_rect(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
    let (iw, ih) = img.dimensions();
    for yy in y..(y + h).min(ih) {
        for xx in x..(x + w).min(iw) {
            img.put_pixel(xx, yy, Luma([value]));
        }
    }
}

/// Fill every pixel with `(x - cx)^2 + (y - cy)^2 <= r^2`.
pub(crate) fn fill_disc(img: &mut GrayImage, center: [f64; 2], radius: f64, value: u8) {
    let (w, h) = img.dimensions();
    let x0 = (center[0] - radius).floor().max(0.0) as u32;
    let y0 = (center[1] - radius).floor().max(0.0) as u32;
    let x1 = ((center[0] + radius).ceil().max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = ((center[1] + radius).ceil().max(0.0) as u32).min(h.saturating_sub(1));
    let r2 = radius * radius;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

/// Fill a convex quadrilateral given in either winding order.
pub(crate) fn fill_quad(img: &mut GrayImage, corners: [[f64; 2]; 4], value: u8) {
    let (w, h) = img.dimensions();
    let edge = |a: [f64; 2], b: [f64; 2], p: [f64; 2]| {
        (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
    };
    for y in 0..h {
        for x in 0..w {
            let p = [x as f64, y as f64];
            let signs: Vec<f64> = (0..4).map(|i| edge(corners[i], corners[(i + 1) % 4], p)).collect();
            if signs.iter().all(|&s| s >= 0.0) || signs.iter().all(|&s| s <= 0.0) {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

/// Single-block synthetic sheet description.
#[derive(Debug, Clone)]
pub(crate) struct SheetSpec {
    pub page: [u32; 2],
    pub radius: f64,
    pub origin: [f64; 2],
    pub question_pitch: f64,
    pub choice_pitch: f64,
    pub questions: usize,
    pub choices: usize,
    pub fiducials: [[f64; 2]; 4],
    /// Half side of the square fiducial marks.
    pub fiducial_half: u32,
}

impl SheetSpec {
    /// 400x400 page, 5 questions x 5 choices at 40px pitch, radius 10.
    pub(crate) fn five_by_five() -> Self {
        Self {
            page: [400, 400],
            radius: 10.0,
            origin: [100.0, 100.0],
            question_pitch: 40.0,
            choice_pitch: 40.0,
            questions: 5,
            choices: 5,
            fiducials: [[30.0, 30.0], [370.0, 30.0], [370.0, 370.0], [30.0, 370.0]],
            fiducial_half: 8,
        }
    }

    pub(crate) fn template(&self) -> TemplateLayout {
        TemplateLayout::from_parts(
            "synthetic",
            self.page,
            self.fiducials,
            self.radius,
            vec![AnswerBlock {
                origin: self.origin,
                questions: self.questions,
                question_pitch_px: self.question_pitch,
                choice_pitch_px: self.choice_pitch,
            }],
            None,
            Vec::new(),
        )
        .expect("synthetic template must be valid")
    }

    pub(crate) fn center(&self, question: usize, choice: usize) -> [f64; 2] {
        [
            self.origin[0] + choice as f64 * self.choice_pitch,
            self.origin[1] + question as f64 * self.question_pitch,
        ]
    }
}

/// Render an aligned sheet. `marks[q]` lists the filled choices of
/// question `q`; missing entries are blank.
pub(crate) fn render_sheet(spec: &SheetSpec, marks: &[Vec<usize>]) -> GrayImage {
    render_template(&spec.template(), spec.choices, marks, spec.fiducial_half)
}

/// Render any template 1:1: square fiducials of half side `fiducial_half`,
/// tinted bubbles, black marks, and a printed label block at the left of
/// every metadata field.
pub(crate) fn render_template(
    template: &TemplateLayout,
    choices: usize,
    marks: &[Vec<usize>],
    fiducial_half: u32,
) -> GrayImage {
    let [w, h] = template.page_size;
    let mut img = GrayImage::from_pixel(w, h, Luma([255]));
    let s = fiducial_half;
    for f in template.fiducials {
        fill_rect(&mut img, f[0] as u32 - s, f[1] as u32 - s, 2 * s + 1, 2 * s + 1, 0);
    }
    for region in &template.metadata {
        let r = region.rect;
        let (lw, lh) = ((r.width / 4).max(1), (r.height / 2).max(1));
        fill_rect(&mut img, r.x + 2, r.y + r.height / 4, lw, lh, 20);
    }
    let r = template.bubble_radius_px;
    for (q, slot) in template.bubble_centers(choices).iter().enumerate() {
        for c in slot {
            fill_disc(&mut img, c.to_array(), r, BUBBLE_TINT);
        }
        for &c in marks.get(q).map(Vec::as_slice).unwrap_or(&[]) {
            fill_disc(&mut img, slot[c].to_array(), r, 0);
        }
    }
    img
}

/// Place a rendered sheet into a larger canvas, with its page corners
/// landing on `corners` (TL, TR, BR, BL).
pub(crate) fn warp_sheet_onto_canvas(
    sheet: &GrayImage,
    corners: [[f64; 2]; 4],
    (w, h): (u32, u32),
    background: u8,
) -> GrayImage {
    let page = Quad::<TemplateSpace>::from_rect(sheet.width() as f64, sheet.height() as f64);
    let target = Quad::<ImageSpace>::new(corners.map(ImagePoint::from_array));
    let h_t2i = Homography::estimate(page.corners(), target.corners())
        .expect("canvas corners must be a valid quad");
    let projection = projection_from(&h_t2i).expect("projection must be invertible");
    let mut out = GrayImage::from_pixel(w, h, Luma([background]));
    warp_into(
        sheet,
        &projection,
        Interpolation::Bicubic,
        Luma([background]),
        &mut out,
    );
    out
}
