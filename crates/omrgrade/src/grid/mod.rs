//! Bubble grid resolution.
//!
//! A [`GridSpec`] lists, per question, the template-space centers of its
//! choice bubbles. It comes either from the template's answer blocks (fixed
//! mode) or from darkness projections of the aligned sheet (inferred mode).

pub mod profile;

use image::GrayImage;

use crate::config::{GradeConfig, GridMode, InferenceParams};
use crate::geometry::{PixelRect, TemplatePoint};
use crate::template::TemplateLayout;

use profile::PeakParams;

/// Projection axis, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Columns,
    Rows,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Columns => write!(f, "column"),
            Self::Rows => write!(f, "row"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    /// No peak survived the noise floor along an axis.
    NoPeaks { axis: Axis },
    /// Column peak count is not a multiple of the choice count.
    IndivisibleColumns { columns: usize, choices: usize },
    /// Inferred slot count disagrees with `questions_per_sheet`.
    SlotCountMismatch { expected: usize, found: usize },
    /// Template defines fewer questions than requested.
    TemplateTooSmall { requested: usize, available: usize },
    /// Slots disagree on the number of choices, or a slot is empty.
    InconsistentCardinality { question: usize, expected: usize, found: usize },
    /// Inference region does not intersect the aligned image.
    EmptyRegion,
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPeaks { axis } => write!(f, "grid inference found no {} peaks", axis),
            Self::IndivisibleColumns { columns, choices } => write!(
                f,
                "grid inference found {} bubble columns, not a multiple of {} choices",
                columns, choices
            ),
            Self::SlotCountMismatch { expected, found } => write!(
                f,
                "grid inference found {} questions, expected {}",
                found, expected
            ),
            Self::TemplateTooSmall {
                requested,
                available,
            } => write!(
                f,
                "template has {} questions, {} requested",
                available, requested
            ),
            Self::InconsistentCardinality {
                question,
                expected,
                found,
            } => write!(
                f,
                "question {} has {} bubbles, expected {}",
                question, found, expected
            ),
            Self::EmptyRegion => write!(f, "bubble region lies outside the aligned image"),
        }
    }
}

impl std::error::Error for GridError {}

/// Bubble centers of one question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionSlot {
    question: usize,
    centers: Vec<TemplatePoint>,
}

impl QuestionSlot {
    /// 1-based question number.
    pub fn question(&self) -> usize {
        self.question
    }

    /// Bubble centers ordered by choice index.
    pub fn centers(&self) -> &[TemplatePoint] {
        &self.centers
    }
}

/// Ordered question slots sharing one choice cardinality.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    choices: usize,
    slots: Vec<QuestionSlot>,
}

impl GridSpec {
    /// Number questions 1.. in the given order.
    pub fn new(questions: Vec<Vec<TemplatePoint>>) -> Result<Self, GridError> {
        let choices = questions.first().map(Vec::len).unwrap_or(0);
        let mut slots = Vec::with_capacity(questions.len());
        for (i, centers) in questions.into_iter().enumerate() {
            if centers.is_empty() || centers.len() != choices {
                return Err(GridError::InconsistentCardinality {
                    question: i + 1,
                    expected: choices,
                    found: centers.len(),
                });
            }
            slots.push(QuestionSlot {
                question: i + 1,
                centers,
            });
        }
        Ok(Self { choices, slots })
    }

    pub fn choices(&self) -> usize {
        self.choices
    }

    pub fn slots(&self) -> &[QuestionSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Fixed-mode grid: template bubbles, truncated to `questions` when given.
pub fn resolve_fixed(
    template: &TemplateLayout,
    choices: usize,
    questions: Option<usize>,
) -> Result<GridSpec, GridError> {
    let mut centers = template.bubble_centers(choices);
    if let Some(q) = questions {
        if q > centers.len() {
            return Err(GridError::TemplateTooSmall {
                requested: q,
                available: centers.len(),
            });
        }
        centers.truncate(q);
    }
    GridSpec::new(centers)
}

/// Build a grid from column and row darkness profiles of a region whose
/// top-left pixel is `origin`.
///
/// Column peaks are split into consecutive groups of `choices`; every group
/// crossed with every row peak is a question. Numbering runs down the first
/// group, then the next.
pub fn infer_from_profiles(
    columns: &[f64],
    rows: &[f64],
    origin: [f64; 2],
    choices: usize,
    expected_questions: Option<usize>,
    params: &PeakParams,
) -> Result<GridSpec, GridError> {
    let col_peaks = profile::detect_peaks(columns, params);
    let row_peaks = profile::detect_peaks(rows, params);
    tracing::debug!(
        "grid inference: {} column peaks, {} row peaks",
        col_peaks.len(),
        row_peaks.len()
    );
    if col_peaks.is_empty() {
        return Err(GridError::NoPeaks { axis: Axis::Columns });
    }
    if row_peaks.is_empty() {
        return Err(GridError::NoPeaks { axis: Axis::Rows });
    }
    if choices == 0 || col_peaks.len() % choices != 0 {
        return Err(GridError::IndivisibleColumns {
            columns: col_peaks.len(),
            choices,
        });
    }

    let n_slots = (col_peaks.len() / choices) * row_peaks.len();
    if let Some(expected) = expected_questions {
        if expected != n_slots {
            return Err(GridError::SlotCountMismatch {
                expected,
                found: n_slots,
            });
        }
    }

    let mut questions = Vec::with_capacity(n_slots);
    for group in col_peaks.chunks(choices) {
        for &y in &row_peaks {
            questions.push(
                group
                    .iter()
                    .map(|&x| TemplatePoint::new(origin[0] + x, origin[1] + y))
                    .collect(),
            );
        }
    }
    GridSpec::new(questions)
}

/// Inferred-mode grid from an aligned sheet.
pub fn infer_from_image(
    aligned: &GrayImage,
    region: PixelRect,
    choices: usize,
    expected_questions: Option<usize>,
    params: &PeakParams,
) -> Result<GridSpec, GridError> {
    let (w, h) = aligned.dimensions();
    let rect = region.clip_to(w, h).ok_or(GridError::EmptyRegion)?;
    let columns = profile::column_darkness(aligned, rect);
    let rows = profile::row_darkness(aligned, rect);
    infer_from_profiles(
        &columns,
        &rows,
        [rect.x as f64, rect.y as f64],
        choices,
        expected_questions,
        params,
    )
}

/// Produces the grid for each aligned sheet according to the grid mode.
#[derive(Debug, Clone)]
pub struct GridResolver {
    mode: GridMode,
    choices: usize,
    questions: Option<usize>,
    region: PixelRect,
    peaks: PeakParams,
    /// Precomputed in fixed mode; the template never changes per sheet.
    fixed: Option<GridSpec>,
}

impl GridResolver {
    pub fn new(config: &GradeConfig, template: &TemplateLayout) -> Result<Self, GridError> {
        let fixed = match config.grid_mode {
            GridMode::Fixed => Some(resolve_fixed(
                template,
                config.choices_per_question,
                config.questions_per_sheet,
            )?),
            GridMode::Inferred => None,
        };
        Ok(Self {
            mode: config.grid_mode,
            choices: config.choices_per_question,
            questions: config.questions_per_sheet,
            region: template.bubble_region,
            peaks: peak_params(&config.inference, template.bubble_radius_px),
            fixed,
        })
    }

    pub fn mode(&self) -> GridMode {
        self.mode
    }

    pub fn resolve(&self, aligned: &GrayImage) -> Result<GridSpec, GridError> {
        match &self.fixed {
            Some(grid) => Ok(grid.clone()),
            None => infer_from_image(
                aligned,
                self.region,
                self.choices,
                self.questions,
                &self.peaks,
            ),
        }
    }
}

pub(crate) fn peak_params(params: &InferenceParams, bubble_radius_px: f64) -> PeakParams {
    PeakParams {
        smoothing_half_width: params.smoothing_radius(bubble_radius_px).round().max(0.0) as usize,
        noise_floor_multiplier: params.noise_floor_multiplier,
        merge_tolerance_px: params.merge_tolerance(bubble_radius_px),
    }
}
