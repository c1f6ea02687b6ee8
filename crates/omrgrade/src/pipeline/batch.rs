//! Parallel grading of independent sheets.

use std::collections::BTreeMap;
use std::path::PathBuf;

use image::GrayImage;
use rayon::prelude::*;

use super::result::{GradeReport, Outcome};
use super::run::GradingEngine;
use super::GradeError;

/// Where a sheet comes from.
#[derive(Debug, Clone)]
pub enum SheetSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Image(GrayImage),
}

/// One named sheet of a batch.
#[derive(Debug, Clone)]
pub struct SheetInput {
    pub name: String,
    pub source: SheetSource,
}

impl SheetInput {
    /// Named after the file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: SheetSource::Path(path),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: SheetSource::Bytes(bytes),
        }
    }

    pub fn from_image(name: impl Into<String>, image: GrayImage) -> Self {
        Self {
            name: name.into(),
            source: SheetSource::Image(image),
        }
    }
}

/// Result of one batch entry.
#[derive(Debug)]
pub struct SheetOutcome {
    pub name: String,
    pub result: Result<GradeReport, GradeError>,
}

fn grade_one(engine: &GradingEngine, input: &SheetInput) -> Result<GradeReport, GradeError> {
    let report = match &input.source {
        SheetSource::Path(path) => engine.grade_path(path)?,
        SheetSource::Bytes(bytes) => engine.grade_bytes(bytes)?,
        SheetSource::Image(image) => engine.grade(image)?,
    };
    Ok(report.with_sheet(input.name.clone()))
}

/// Grade every input in parallel. Outcomes keep input order; a failing
/// sheet only fails its own entry.
pub fn grade_batch(engine: &GradingEngine, inputs: &[SheetInput]) -> Vec<SheetOutcome> {
    let outcomes: Vec<SheetOutcome> = inputs
        .par_iter()
        .map(|input| {
            let result = grade_one(engine, input);
            if let Err(e) = &result {
                tracing::warn!("{}: {}", input.name, e);
            }
            SheetOutcome {
                name: input.name.clone(),
                result,
            }
        })
        .collect();
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    tracing::info!(
        "batch graded {} sheets ({} failed)",
        outcomes.len(),
        failed
    );
    outcomes
}

/// Outcome counts of one question over the graded sheets of a batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QuestionStats {
    pub question: usize,
    /// Sheets on which the question was keyed.
    pub responses: usize,
    pub correct: usize,
    pub wrong: usize,
    pub missing: usize,
    pub multiple: usize,
    /// `correct / responses`, 0 when never keyed.
    pub accuracy: f64,
}

impl QuestionStats {
    fn new(question: usize) -> Self {
        Self {
            question,
            responses: 0,
            correct: 0,
            wrong: 0,
            missing: 0,
            multiple: 0,
            accuracy: 0.0,
        }
    }
}

/// Aggregate statistics over a batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BatchSummary {
    pub sheets: usize,
    pub graded: usize,
    pub failed: usize,
    /// Graded sheets with at least one multiple-marked question.
    pub sheets_with_multiple: usize,
    pub graded_as_answer_key: usize,
    pub total_score: f64,
    pub max_score: f64,
    /// `total_score / max_score` in percent, clamped at 0.
    pub average_percentage: f64,
    /// Correct over keyed questions of all graded sheets.
    pub overall_accuracy: f64,
    /// Keyed questions in question order.
    pub questions: Vec<QuestionStats>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[SheetOutcome]) -> Self {
        let reports: Vec<&GradeReport> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect();
        let mut summary = Self::from_reports(&reports);
        summary.sheets = outcomes.len();
        summary.failed = outcomes.len() - summary.graded;
        summary
    }

    pub fn from_reports(reports: &[&GradeReport]) -> Self {
        let mut per_question: BTreeMap<usize, QuestionStats> = BTreeMap::new();
        let mut total_score = 0.0;
        let mut max_score = 0.0;
        let mut keyed = 0usize;
        let mut correct = 0usize;
        let mut sheets_with_multiple = 0usize;
        let mut graded_as_answer_key = 0usize;

        for report in reports {
            let s = report.summary();
            total_score += s.score;
            max_score += s.max_score;
            keyed += s.keyed;
            correct += s.correct;
            if s.multiple > 0 {
                sheets_with_multiple += 1;
            }
            if report.graded_as_answer_key() {
                graded_as_answer_key += 1;
            }
            for q in report.questions() {
                if q.outcome == Outcome::Unkeyed {
                    continue;
                }
                let stats = per_question
                    .entry(q.question)
                    .or_insert_with(|| QuestionStats::new(q.question));
                stats.responses += 1;
                match q.outcome {
                    Outcome::Correct => stats.correct += 1,
                    Outcome::Wrong => stats.wrong += 1,
                    Outcome::Missing => stats.missing += 1,
                    Outcome::Multiple => stats.multiple += 1,
                    Outcome::Unkeyed => {}
                }
            }
        }

        let questions = per_question
            .into_values()
            .map(|mut stats| {
                stats.accuracy = ratio(stats.correct, stats.responses);
                stats
            })
            .collect();
        let average_percentage = if max_score > 0.0 {
            (100.0 * total_score / max_score).max(0.0)
        } else {
            0.0
        };

        Self {
            sheets: reports.len(),
            graded: reports.len(),
            failed: 0,
            sheets_with_multiple,
            graded_as_answer_key,
            total_score,
            max_score,
            average_percentage,
            overall_accuracy: ratio(correct, keyed),
            questions,
        }
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}
