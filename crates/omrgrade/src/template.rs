//! Runtime answer-sheet template.
//!
//! Template JSON follows a parametric schema (`omrgrade.template.v1`): bubble
//! centers are generated at runtime from answer blocks
//! `(origin, questions, question_pitch_px, choice_pitch_px)`. Per-bubble
//! coordinate lists are not part of the schema. All coordinates are template
//! pixels, i.e. pixels of the aligned sheet image.

use std::path::Path;

use crate::geometry::{PixelRect, Quad, TemplatePoint, TemplateSpace};

pub(crate) const TEMPLATE_SCHEMA_V1: &str = "omrgrade.template.v1";

const DEFAULT_NAME: &str = "a4_150dpi_60q";
const DEFAULT_PAGE: [u32; 2] = [1240, 1754];
const DEFAULT_BUBBLE_RADIUS_PX: f64 = 14.0;
const DEFAULT_QUESTION_PITCH_PX: f64 = 56.0;
const DEFAULT_CHOICE_PITCH_PX: f64 = 44.0;
const DEFAULT_BLOCK_QUESTIONS: usize = 20;
const DEFAULT_BLOCK_X: [f64; 3] = [180.0, 560.0, 940.0];
const DEFAULT_BLOCK_Y: f64 = 480.0;

/// A column of consecutive questions with evenly spaced choice bubbles.
///
/// Question `k` (0-based within the block) has its first bubble at
/// `origin + (0, k * question_pitch_px)`; choice `j` is offset by
/// `j * choice_pitch_px` along x.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnswerBlock {
    pub origin: [f64; 2],
    pub questions: usize,
    pub question_pitch_px: f64,
    pub choice_pitch_px: f64,
}

impl AnswerBlock {
    fn center(&self, question: usize, choice: usize) -> TemplatePoint {
        TemplatePoint::new(
            self.origin[0] + choice as f64 * self.choice_pitch_px,
            self.origin[1] + question as f64 * self.question_pitch_px,
        )
    }
}

/// Rectangular text field read by the metadata extractor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataRegion {
    /// Output field name, e.g. `"student_id"`.
    pub name: String,
    pub rect: PixelRect,
    /// Printed labels that may prefix the recognized text.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Keep only ASCII digits of the parsed value.
    #[serde(default)]
    pub digits_only: bool,
}

fn default_delimiter() -> char {
    ':'
}

impl MetadataRegion {
    pub fn new(name: &str, rect: PixelRect, labels: &[&str], digits_only: bool) -> Self {
        Self {
            name: name.to_string(),
            rect,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            delimiter: default_delimiter(),
            digits_only,
        }
    }
}

/// Runtime template used by the grading pipeline.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    pub name: String,
    /// Aligned sheet size `[width, height]` in pixels.
    pub page_size: [u32; 2],
    /// Registration mark centers ordered TL, TR, BR, BL.
    pub fiducials: [[f64; 2]; 4],
    pub bubble_radius_px: f64,
    pub blocks: Vec<AnswerBlock>,
    /// Area scanned by grid inference.
    pub bubble_region: PixelRect,
    pub metadata: Vec<MetadataRegion>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateSpecV1 {
    schema: String,
    name: String,
    page_size: [u32; 2],
    fiducials: [[f64; 2]; 4],
    bubble_radius_px: f64,
    blocks: Vec<AnswerBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bubble_region: Option<PixelRect>,
    #[serde(default)]
    metadata: Vec<MetadataRegion>,
}

impl TemplateLayout {
    /// Total number of question rows over all blocks.
    pub fn n_questions(&self) -> usize {
        self.blocks.iter().map(|b| b.questions).sum()
    }

    pub fn page_quad(&self) -> Quad<TemplateSpace> {
        Quad::from_rect(self.page_size[0] as f64, self.page_size[1] as f64)
    }

    pub fn fiducial_quad(&self) -> Quad<TemplateSpace> {
        Quad::new(self.fiducials.map(TemplatePoint::from_array))
    }

    /// Fiducial centers as fractions of the page size.
    pub fn fiducial_anchors(&self) -> [[f64; 2]; 4] {
        let [w, h] = self.page_size;
        self.fiducials.map(|f| [f[0] / w as f64, f[1] / h as f64])
    }

    /// Page area searched for each fiducial when `window_frac` of the page
    /// side is scanned around it.
    pub fn fiducial_search_windows(&self, window_frac: f64) -> [PixelRect; 4] {
        let [w, h] = self.page_size;
        let half = [0.5 * window_frac * w as f64, 0.5 * window_frac * h as f64];
        self.fiducials.map(|f| PixelRect::around(f, half, w, h))
    }

    /// Fails when a bubble or metadata field falls inside a fiducial search
    /// window.
    pub fn check_fiducial_clearance(&self, choices: usize, window_frac: f64) -> Result<(), String> {
        const CORNERS: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];
        let windows = self.fiducial_search_windows(window_frac);
        for (window, corner) in windows.iter().zip(CORNERS) {
            for (i, slot) in self.bubble_centers(choices).iter().enumerate() {
                if let Some(c) = slot
                    .iter()
                    .position(|p| window.touches_disc(p.to_array(), self.bubble_radius_px))
                {
                    return Err(format!(
                        "question {} choice {} lies in the {} fiducial search window",
                        i + 1,
                        c + 1,
                        corner
                    ));
                }
            }
            if let Some(region) = self.metadata.iter().find(|r| window.intersects(&r.rect)) {
                return Err(format!(
                    "metadata region '{}' lies in the {} fiducial search window",
                    region.name, corner
                ));
            }
        }
        Ok(())
    }

    /// Bubble centers per question in block order, `choices` per question.
    pub fn bubble_centers(&self, choices: usize) -> Vec<Vec<TemplatePoint>> {
        let mut out = Vec::with_capacity(self.n_questions());
        for block in &self.blocks {
            for q in 0..block.questions {
                out.push((0..choices).map(|c| block.center(q, c)).collect());
            }
        }
        out
    }

    /// Load a template from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let spec: TemplateSpecV1 = serde_json::from_str(data)?;
        Self::from_spec(spec).map_err(Into::into)
    }

    /// Serialize back to the `omrgrade.template.v1` JSON form.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let spec = TemplateSpecV1 {
            schema: TEMPLATE_SCHEMA_V1.to_string(),
            name: self.name.clone(),
            page_size: self.page_size,
            fiducials: self.fiducials,
            bubble_radius_px: self.bubble_radius_px,
            blocks: self.blocks.clone(),
            bubble_region: Some(self.bubble_region),
            metadata: self.metadata.clone(),
        };
        serde_json::to_string_pretty(&spec)
    }

    /// Build a template from parts, deriving the inference region from the
    /// blocks when `bubble_region` is `None`.
    pub fn from_parts(
        name: &str,
        page_size: [u32; 2],
        fiducials: [[f64; 2]; 4],
        bubble_radius_px: f64,
        blocks: Vec<AnswerBlock>,
        bubble_region: Option<PixelRect>,
        metadata: Vec<MetadataRegion>,
    ) -> Result<Self, String> {
        Self::from_spec(TemplateSpecV1 {
            schema: TEMPLATE_SCHEMA_V1.to_string(),
            name: name.to_string(),
            page_size,
            fiducials,
            bubble_radius_px,
            blocks,
            bubble_region,
            metadata,
        })
    }

    fn from_spec(spec: TemplateSpecV1) -> Result<Self, String> {
        if spec.schema != TEMPLATE_SCHEMA_V1 {
            return Err(format!(
                "unsupported template schema '{}' (expected '{}')",
                spec.schema, TEMPLATE_SCHEMA_V1
            ));
        }
        validate_spec(&spec)?;

        let bubble_region = match spec.bubble_region {
            Some(r) => r,
            None => derived_bubble_region(&spec.blocks, spec.bubble_radius_px, spec.page_size)?,
        };

        Ok(Self {
            name: spec.name,
            page_size: spec.page_size,
            fiducials: spec.fiducials,
            bubble_radius_px: spec.bubble_radius_px,
            blocks: spec.blocks,
            bubble_region,
            metadata: spec.metadata,
        })
    }
}

impl Default for TemplateLayout {
    fn default() -> Self {
        let [w, h] = DEFAULT_PAGE;
        let (wf, hf) = (w as f64, h as f64);
        let blocks = DEFAULT_BLOCK_X
            .iter()
            .map(|&x| AnswerBlock {
                origin: [x, DEFAULT_BLOCK_Y],
                questions: DEFAULT_BLOCK_QUESTIONS,
                question_pitch_px: DEFAULT_QUESTION_PITCH_PX,
                choice_pitch_px: DEFAULT_CHOICE_PITCH_PX,
            })
            .collect();
        let metadata = vec![
            MetadataRegion::new("name", PixelRect::new(120, 180, 640, 60), &["Name", "ชื่อ"], false),
            MetadataRegion::new(
                "student_id",
                PixelRect::new(780, 180, 340, 60),
                &["Student ID", "รหัสนักศึกษา"],
                true,
            ),
            MetadataRegion::new("subject", PixelRect::new(120, 250, 640, 60), &["Subject", "วิชา"], false),
            MetadataRegion::new(
                "subject_code",
                PixelRect::new(780, 250, 340, 60),
                &["Subject Code", "รหัสวิชา"],
                false,
            ),
            MetadataRegion::new("date", PixelRect::new(120, 320, 640, 60), &["Date", "วันที่"], false),
            MetadataRegion::new(
                "exam_room",
                PixelRect::new(780, 320, 340, 60),
                &["Exam Room", "ห้องสอบ"],
                false,
            ),
        ];
        Self::from_parts(
            DEFAULT_NAME,
            DEFAULT_PAGE,
            [[60.0, 60.0], [wf - 60.0, 60.0], [wf - 60.0, hf - 60.0], [60.0, hf - 60.0]],
            DEFAULT_BUBBLE_RADIUS_PX,
            blocks,
            None,
            metadata,
        )
        .expect("default template must be valid")
    }
}

fn finite_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn validate_spec(spec: &TemplateSpecV1) -> Result<(), String> {
    if spec.name.trim().is_empty() {
        return Err("template name must not be empty".to_string());
    }
    let [w, h] = spec.page_size;
    if w < crate::image_io::MIN_SIDE_PX || h < crate::image_io::MIN_SIDE_PX {
        return Err(format!("page_size {}x{} is too small", w, h));
    }
    if !finite_positive(spec.bubble_radius_px) {
        return Err("bubble_radius_px must be finite and > 0".to_string());
    }
    if spec.blocks.is_empty() {
        return Err("template needs at least one answer block".to_string());
    }
    for (i, b) in spec.blocks.iter().enumerate() {
        if b.questions == 0 {
            return Err(format!("block {} has no questions", i));
        }
        if !b.origin.iter().all(|v| v.is_finite()) {
            return Err(format!("block {} origin must be finite", i));
        }
        if !finite_positive(b.question_pitch_px) || !finite_positive(b.choice_pitch_px) {
            return Err(format!("block {} pitches must be finite and > 0", i));
        }
        if b.question_pitch_px <= spec.bubble_radius_px || b.choice_pitch_px <= spec.bubble_radius_px
        {
            return Err(format!(
                "block {} pitch must exceed the bubble radius ({:.1}px)",
                i, spec.bubble_radius_px
            ));
        }
    }
    let fiducials = Quad::<TemplateSpace>::new(spec.fiducials.map(TemplatePoint::from_array));
    fiducials
        .validate()
        .map_err(|e| format!("fiducials: {}", e))?;
    if spec
        .fiducials
        .iter()
        .any(|f| !(0.0..=w as f64).contains(&f[0]) || !(0.0..=h as f64).contains(&f[1]))
    {
        return Err("fiducials must lie on the page".to_string());
    }
    for region in &spec.metadata {
        if region.name.trim().is_empty() {
            return Err("metadata region name must not be empty".to_string());
        }
        if region.rect.clip_to(w, h).is_none() {
            return Err(format!("metadata region '{}' lies outside the page", region.name));
        }
    }
    if let Some(r) = spec.bubble_region {
        if r.clip_to(w, h).is_none() {
            return Err("bubble_region lies outside the page".to_string());
        }
    }
    Ok(())
}

/// Bounding box of the first bubble column of every block, widened by the
/// bubble diameter. The choice extent is not known here, so the box runs to
/// the right edge of the page.
fn derived_bubble_region(
    blocks: &[AnswerBlock],
    radius: f64,
    page_size: [u32; 2],
) -> Result<PixelRect, String> {
    let margin = 2.0 * radius;
    let mut x0 = f64::INFINITY;
    let mut y0 = f64::INFINITY;
    let mut y1 = f64::NEG_INFINITY;
    for b in blocks {
        x0 = x0.min(b.origin[0]);
        y0 = y0.min(b.origin[1]);
        y1 = y1.max(b.origin[1] + (b.questions - 1) as f64 * b.question_pitch_px);
    }
    let x0 = (x0 - margin).max(0.0) as u32;
    let y0 = (y0 - margin).max(0.0) as u32;
    let y1 = ((y1 + margin).max(0.0) as u32).min(page_size[1]);
    let rect = PixelRect::new(x0, y0, page_size[0].saturating_sub(x0), y1.saturating_sub(y0));
    rect.clip_to(page_size[0], page_size[1])
        .ok_or_else(|| "answer blocks lie outside the page".to_string())
}
