//! Sheet orchestrator: markers -> alignment -> grid -> scores -> report.

use std::collections::BTreeMap;
use std::path::Path;

use image::GrayImage;

use super::result::{AlignmentInfo, GradeReport, GradeSummary, Outcome, QuestionResult};
use super::{GradeError, GradingSession};
use crate::answer_key::{AnswerKey, AnswerKeyError};
use crate::bubble::{score_slot, Answer, AnswerDecider, AnswerDecision, BubbleScore};
use crate::config::SelfKeyParams;
use crate::geometry::{Quad, TemplateSpace};
use crate::grid::{GridResolver, GridSpec};
use crate::homography::{AlignedSheet, PerspectiveAligner};
use crate::image_io;
use crate::marker::{MarkerDetection, MarkerLocator};
use crate::metadata::{MetadataExtractor, MetadataField};

/// Grades sheets against one session.
///
/// Create once, grade many sheets; `&GradingEngine` can be shared across
/// threads.
#[derive(Debug)]
pub struct GradingEngine {
    session: GradingSession,
    locator: MarkerLocator,
    template_quad: Quad<TemplateSpace>,
    aligner: PerspectiveAligner,
    grid: GridResolver,
    decider: AnswerDecider,
    sample_radius: f64,
    metadata: Option<MetadataExtractor>,
}

impl GradingEngine {
    pub fn new(session: GradingSession) -> Result<Self, GradeError> {
        let config = session.config();
        let template = session.template();
        let locator = MarkerLocator::from_config(config, template);
        let template_quad = locator.template_quad(template);
        let grid = GridResolver::new(config, template)?;
        let metadata = match session.recognizer() {
            Some(rec) if config.metadata.enable => {
                Some(MetadataExtractor::new(rec.clone(), &config.metadata))
            }
            _ => None,
        };
        if metadata.is_none() && config.metadata.enable && !template.metadata.is_empty() {
            tracing::debug!("no text recognizer configured; metadata fields stay empty");
        }
        let [w, h] = template.page_size;
        let aligner = PerspectiveAligner::new(w, h);
        let decider = AnswerDecider::new(
            config.unfilled_threshold,
            config.multiple_margin_threshold,
        );
        let sample_radius = config.sample_radius(template.bubble_radius_px);
        Ok(Self {
            session,
            locator,
            template_quad,
            aligner,
            grid,
            decider,
            sample_radius,
            metadata,
        })
    }

    pub fn session(&self) -> &GradingSession {
        &self.session
    }

    /// Find the reference points and resample the sheet into template pixels.
    pub fn align(&self, raw: &GrayImage) -> Result<(AlignedSheet, MarkerDetection), GradeError> {
        let detection = self.locator.locate(raw)?;
        let aligned = self
            .aligner
            .align(raw, &detection.quad, &self.template_quad)?;
        tracing::debug!(
            "aligned {}x{} sheet with {:?} markers (min confidence {:.2})",
            raw.width(),
            raw.height(),
            detection.mode,
            detection.min_confidence()
        );
        Ok((aligned, detection))
    }

    /// Grade a raw sheet photo.
    pub fn grade(&self, raw: &GrayImage) -> Result<GradeReport, GradeError> {
        let (aligned, detection) = self.align(raw)?;
        let report = self.grade_aligned(&aligned.image)?;
        Ok(report.with_alignment(AlignmentInfo {
            marker_mode: detection.mode,
            marker_quad: detection.quad.to_arrays(),
            corner_confidence: detection.corner_confidence,
            image_to_template: aligned.image_to_template.to_array(),
        }))
    }

    /// Grade an image that is already in template pixel space.
    pub fn grade_aligned(&self, aligned: &GrayImage) -> Result<GradeReport, GradeError> {
        let grid = self.grid.resolve(aligned)?;
        let mut metadata = self.extract_metadata(aligned);
        let key = self.session.answer_key();

        let mut questions: Vec<QuestionResult> = self
            .decide_all(aligned, &grid)
            .into_iter()
            .map(|(question, decision, scores)| {
                let expected = key.and_then(|k| k.get(question));
                QuestionResult {
                    question,
                    outcome: Outcome::classify(&decision.answer, expected),
                    decision,
                    key: expected,
                    scores,
                }
            })
            .collect();

        let config = self.session.config();
        let as_key = apply_self_key_rule(&mut questions, &config.self_key, config.self_key_max_gap());
        if as_key {
            tracing::info!("sheet looks like a filled answer key; grading every keyed question correct");
            relabel_key_sheet(&mut metadata, &config.self_key.metadata_labels);
        }
        let summary = GradeSummary::tally(&questions, &config.scoring);
        tracing::info!(
            "graded {} questions: {} correct, {} wrong, {} missing, {} multiple ({:.1}%)",
            questions.len(),
            summary.correct,
            summary.wrong,
            summary.missing,
            summary.multiple,
            summary.percentage
        );
        Ok(GradeReport::new(questions, summary, metadata, as_key))
    }

    /// Decode and grade an encoded image.
    pub fn grade_bytes(&self, bytes: &[u8]) -> Result<GradeReport, GradeError> {
        let raw = image_io::load_bytes(bytes)?;
        self.grade(&raw)
    }

    /// Read, decode and grade an image file; the report is named after it.
    pub fn grade_path(&self, path: &Path) -> Result<GradeReport, GradeError> {
        let raw = image_io::load_path(path)?;
        let report = self.grade(&raw)?;
        Ok(report.with_sheet(sheet_name(path)))
    }

    /// Build an answer key from a filled key sheet photo.
    pub fn read_answer_key(&self, raw: &GrayImage) -> Result<AnswerKey, GradeError> {
        let (aligned, _) = self.align(raw)?;
        self.read_answer_key_aligned(&aligned.image)
    }

    /// Every question must be a single clear mark.
    pub fn read_answer_key_aligned(&self, aligned: &GrayImage) -> Result<AnswerKey, GradeError> {
        let grid = self.grid.resolve(aligned)?;
        let mut pairs = Vec::with_capacity(grid.len());
        for (question, decision, _) in self.decide_all(aligned, &grid) {
            match decision.answer {
                Answer::Selected { choice } => pairs.push((question, choice)),
                other => {
                    return Err(AnswerKeyError::UnreadableKeySheet {
                        question,
                        decision: describe(&other),
                    }
                    .into())
                }
            }
        }
        let key = AnswerKey::from_pairs(&pairs)?;
        tracing::info!("read answer key with {} questions", key.len());
        Ok(key)
    }

    fn decide_all(
        &self,
        aligned: &GrayImage,
        grid: &GridSpec,
    ) -> Vec<(usize, AnswerDecision, Vec<BubbleScore>)> {
        grid.slots()
            .iter()
            .map(|slot| {
                let scores = score_slot(aligned, slot.centers(), self.sample_radius);
                let decision = self.decider.decide(&scores);
                (slot.question(), decision, scores)
            })
            .collect()
    }

    fn extract_metadata(&self, aligned: &GrayImage) -> Vec<MetadataField> {
        let config = self.session.config();
        let regions = &self.session.template().metadata;
        if !config.metadata.enable {
            return Vec::new();
        }
        match &self.metadata {
            Some(extractor) => extractor.extract(aligned, regions),
            None => regions
                .iter()
                .map(|r| MetadataField {
                    name: r.name.clone(),
                    value: String::new(),
                })
                .collect(),
        }
    }
}

fn sheet_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn describe(answer: &Answer) -> String {
    match answer {
        Answer::Selected { choice } => format!("choice {}", choice),
        Answer::NoAnswer => "no answer".to_string(),
        Answer::Multiple { choices } => format!("multiple marks {:?}", choices),
    }
}

/// A sheet where nearly every keyed question is uniformly filled is the key
/// itself. Every keyed question then becomes correct with the key choice.
fn apply_self_key_rule(
    questions: &mut [QuestionResult],
    params: &SelfKeyParams,
    max_gap: f32,
) -> bool {
    if !params.enable {
        return false;
    }
    let keyed = questions.iter().filter(|q| q.key.is_some()).count();
    if keyed == 0 {
        return false;
    }
    let multiple = questions
        .iter()
        .filter(|q| q.outcome == Outcome::Multiple)
        .count();
    let ratio = multiple as f64 / keyed as f64;
    let observed_gap = questions
        .iter()
        .map(|q| q.decision.darkness_gap)
        .fold(0.0f32, f32::max);
    tracing::debug!(
        "self-key check: multiple ratio {:.2}, max darkness gap {:.3}",
        ratio,
        observed_gap
    );
    if ratio <= params.min_multiple_ratio || observed_gap >= max_gap {
        return false;
    }
    for q in questions.iter_mut() {
        if let Some(choice) = q.key {
            q.decision.answer = Answer::Selected { choice };
            q.outcome = Outcome::Correct;
        }
    }
    true
}

fn relabel_key_sheet(fields: &mut [MetadataField], labels: &BTreeMap<String, String>) {
    for field in fields.iter_mut() {
        if let Some(label) = labels.get(&field.name) {
            field.value = label.clone();
        }
    }
}
