//! omrgrade: grading of photographed multiple-choice answer sheets.
//!
//! The pipeline stages are:
//!
//! 1. **Decode** – JPEG/PNG to 8-bit luma ([`image_io`]).
//! 2. **Markers** – page outline or corner registration marks ([`marker`]).
//! 3. **Align** – four-point homography and bicubic rectification into
//!    template pixels ([`homography`]).
//! 4. **Grid** – bubble centers from the template or from darkness
//!    projections ([`grid`]).
//! 5. **Bubbles** – mean brightness per bubble and a per-question decision
//!    ([`bubble`]).
//! 6. **Metadata** – text fields through a pluggable recognizer
//!    ([`metadata`]).
//! 7. **Report** – comparison with the answer key, scoring, JSON/CSV output
//!    ([`pipeline`]).
//!
//! # Public API
//! - [`GradingSession`] and [`GradingEngine`] as primary entry points
//! - [`GradeConfig`], [`TemplateLayout`] and [`AnswerKey`] as inputs
//! - [`GradeReport`] as output, [`grade_batch`] and [`BatchSummary`] for many sheets

pub mod answer_key;
pub mod bubble;
pub mod config;
pub mod geometry;
pub mod grid;
pub mod homography;
pub mod image_io;
pub mod marker;
pub mod metadata;
pub mod pipeline;
pub mod template;

#[cfg(test)]
pub(crate) mod test_utils;

pub use answer_key::{AnswerKey, AnswerKeyError, KeyEntry};
pub use bubble::{Answer, AnswerDecision, BubbleScore};
pub use config::{GradeConfig, GridMode, MarkerMode, ScoringScheme};
pub use geometry::{ImagePoint, ImageSpace, PixelRect, Point, Quad, TemplatePoint, TemplateSpace};
pub use image_io::DecodeError;
pub use metadata::{MetadataField, RecognitionError, RecognitionHints, TextRecognizer};
pub use pipeline::batch::{
    grade_batch, BatchSummary, QuestionStats, SheetInput, SheetOutcome, SheetSource,
};
pub use pipeline::{
    AlignmentInfo, GradeError, GradeReport, GradeSummary, GradingEngine, GradingSession, Outcome,
    QuestionResult,
};
pub use template::{AnswerBlock, MetadataRegion, TemplateLayout};
