use image::GrayImage;

use crate::geometry::TemplatePoint;

/// Mean normalized brightness of a bubble: 1.0 is paper white, 0.0 is ink.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BubbleScore(f32);

impl BubbleScore {
    pub const BLANK: BubbleScore = BubbleScore(1.0);

    /// Clamp into `[0, 1]`; NaN reads as blank.
    pub fn new(brightness: f32) -> Self {
        if brightness.is_nan() {
            return Self::BLANK;
        }
        Self(brightness.clamp(0.0, 1.0))
    }

    pub fn brightness(self) -> f32 {
        self.0
    }

    pub fn darkness(self) -> f32 {
        1.0 - self.0
    }
}

/// Mean brightness inside the disc of `radius` around `center`, clipped to
/// the image. A disc with no pixel inside the image scores blank.
pub fn score_bubble(img: &GrayImage, center: TemplatePoint, radius: f64) -> BubbleScore {
    let (w, h) = img.dimensions();
    if !center.is_finite() || radius <= 0.0 || w == 0 || h == 0 {
        return BubbleScore::BLANK;
    }
    let r2 = radius * radius;
    let x_lo = (center.x - radius).ceil().max(0.0);
    let y_lo = (center.y - radius).ceil().max(0.0);
    let x_hi = (center.x + radius).floor().min((w - 1) as f64);
    let y_hi = (center.y + radius).floor().min((h - 1) as f64);
    if x_lo > x_hi || y_lo > y_hi {
        return BubbleScore::BLANK;
    }

    let mut sum = 0u64;
    let mut count = 0u64;
    for y in y_lo as u32..=y_hi as u32 {
        let dy = y as f64 - center.y;
        for x in x_lo as u32..=x_hi as u32 {
            let dx = x as f64 - center.x;
            if dx * dx + dy * dy <= r2 {
                sum += u64::from(img.get_pixel(x, y)[0]);
                count += 1;
            }
        }
    }
    if count == 0 {
        return BubbleScore::BLANK;
    }
    BubbleScore::new((sum as f64 / (count as f64 * 255.0)) as f32)
}

/// Scores for every bubble of one question.
pub fn score_slot(img: &GrayImage, centers: &[TemplatePoint], radius: f64) -> Vec<BubbleScore> {
    centers
        .iter()
        .map(|&c| score_bubble(img, c, radius))
        .collect()
}
