//! Sheet grading pipeline.
//!
//! Stage order per sheet: locate markers -> align -> resolve grid ->
//! extract metadata -> score bubbles -> decide -> compare with the key.
//!
//! Entry points:
//! - [`GradingEngine::grade`] / `grade_bytes` / `grade_path`: raw sheet photo
//! - [`GradingEngine::grade_aligned`]: image already in template pixels
//! - [`GradingEngine::read_answer_key`]: build a key from a filled key sheet
//! - [`batch::grade_batch`]: many sheets in parallel

pub mod batch;
pub mod export;
mod result;
mod run;

use std::sync::Arc;

use crate::answer_key::{AnswerKey, AnswerKeyError};
use crate::config::{ConfigError, GradeConfig, MarkerMode};
use crate::grid::GridError;
use crate::homography::HomographyError;
use crate::image_io::DecodeError;
use crate::marker::MarkerNotFoundError;
use crate::metadata::TextRecognizer;
use crate::template::TemplateLayout;

pub use result::{AlignmentInfo, GradeReport, GradeSummary, Outcome, QuestionResult};
pub use run::GradingEngine;

/// Why a sheet could not be graded.
#[derive(Debug)]
pub enum GradeError {
    Decode(DecodeError),
    MarkerNotFound(MarkerNotFoundError),
    DegenerateTransform(HomographyError),
    GridInference(GridError),
    Config(ConfigError),
    AnswerKey(AnswerKeyError),
}

impl std::fmt::Display for GradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{}", e),
            Self::MarkerNotFound(e) => write!(f, "marker search failed: {}", e),
            Self::DegenerateTransform(e) => write!(f, "alignment failed: {}", e),
            Self::GridInference(e) => write!(f, "{}", e),
            Self::Config(e) => write!(f, "{}", e),
            Self::AnswerKey(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GradeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::MarkerNotFound(e) => Some(e),
            Self::DegenerateTransform(e) => Some(e),
            Self::GridInference(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::AnswerKey(e) => Some(e),
        }
    }
}

impl From<DecodeError> for GradeError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<MarkerNotFoundError> for GradeError {
    fn from(e: MarkerNotFoundError) -> Self {
        Self::MarkerNotFound(e)
    }
}

impl From<HomographyError> for GradeError {
    fn from(e: HomographyError) -> Self {
        Self::DegenerateTransform(e)
    }
}

impl From<GridError> for GradeError {
    fn from(e: GridError) -> Self {
        Self::GridInference(e)
    }
}

impl From<ConfigError> for GradeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<AnswerKeyError> for GradeError {
    fn from(e: AnswerKeyError) -> Self {
        Self::AnswerKey(e)
    }
}

/// Everything a grading run depends on. Built once, read by every sheet.
#[derive(Clone)]
pub struct GradingSession {
    config: GradeConfig,
    template: TemplateLayout,
    key: Option<AnswerKey>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
}

impl std::fmt::Debug for GradingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradingSession")
            .field("config", &self.config)
            .field("template", &self.template.name)
            .field("key", &self.key)
            .field("recognizer", &self.recognizer.is_some())
            .finish()
    }
}

impl GradingSession {
    /// Validates the config against the template; no key and no recognizer
    /// yet.
    pub fn new(config: GradeConfig, template: TemplateLayout) -> Result<Self, GradeError> {
        config.validate()?;
        if config.marker_mode == MarkerMode::Fiducial {
            template
                .check_fiducial_clearance(config.choices_per_question, config.fiducial.window_frac)
                .map_err(ConfigError::Invalid)?;
        }
        Ok(Self {
            config,
            template,
            key: None,
            recognizer: None,
        })
    }

    pub fn with_answer_key(mut self, key: AnswerKey) -> Result<Self, GradeError> {
        key.validate_choices(self.config.choices_per_question)?;
        self.key = Some(key);
        Ok(self)
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn config(&self) -> &GradeConfig {
        &self.config
    }

    pub fn template(&self) -> &TemplateLayout {
        &self.template
    }

    pub fn answer_key(&self) -> Option<&AnswerKey> {
        self.key.as_ref()
    }

    pub fn recognizer(&self) -> Option<&Arc<dyn TextRecognizer>> {
        self.recognizer.as_ref()
    }
}
