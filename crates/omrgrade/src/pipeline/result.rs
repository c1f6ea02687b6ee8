use crate::bubble::{Answer, AnswerDecision, BubbleScore};
use crate::config::{MarkerMode, ScoringScheme};
use crate::metadata::MetadataField;

/// Per-question comparison against the answer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Wrong,
    /// No bubble filled.
    Missing,
    Multiple,
    /// No key entry for this question; excluded from the counts.
    Unkeyed,
}

impl Outcome {
    pub(crate) fn classify(answer: &Answer, key: Option<usize>) -> Self {
        let Some(expected) = key else {
            return Self::Unkeyed;
        };
        match answer {
            Answer::Selected { choice } if *choice == expected => Self::Correct,
            Answer::Selected { .. } => Self::Wrong,
            Answer::NoAnswer => Self::Missing,
            Answer::Multiple { .. } => Self::Multiple,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Wrong => "wrong",
            Self::Missing => "missing",
            Self::Multiple => "multiple",
            Self::Unkeyed => "unkeyed",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuestionResult {
    /// 1-based question number.
    pub question: usize,
    pub decision: AnswerDecision,
    pub outcome: Outcome,
    /// Expected choice, if keyed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<usize>,
    /// Raw bubble scores in choice order.
    pub scores: Vec<BubbleScore>,
}

/// Aggregate counts over keyed questions.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradeSummary {
    pub keyed: usize,
    pub correct: usize,
    pub wrong: usize,
    pub missing: usize,
    pub multiple: usize,
    pub score: f64,
    pub max_score: f64,
    /// `100 * score / max_score`, never negative; 0 when nothing is keyed.
    pub percentage: f64,
}

impl GradeSummary {
    pub(crate) fn tally(questions: &[QuestionResult], scheme: &ScoringScheme) -> Self {
        let mut s = Self::default();
        for q in questions {
            let points = match q.outcome {
                Outcome::Correct => {
                    s.correct += 1;
                    scheme.correct
                }
                Outcome::Wrong => {
                    s.wrong += 1;
                    scheme.wrong
                }
                Outcome::Missing => {
                    s.missing += 1;
                    scheme.missing
                }
                Outcome::Multiple => {
                    s.multiple += 1;
                    scheme.multiple
                }
                Outcome::Unkeyed => continue,
            };
            s.keyed += 1;
            s.score += points;
        }
        s.max_score = s.keyed as f64 * scheme.correct;
        s.percentage = if s.max_score > 0.0 {
            (100.0 * s.score / s.max_score).max(0.0)
        } else {
            0.0
        };
        s
    }
}

/// How the raw image was brought into template space.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlignmentInfo {
    pub marker_mode: MarkerMode,
    /// Located reference points in raw pixels, TL, TR, BR, BL.
    pub marker_quad: [[f64; 2]; 4],
    pub corner_confidence: [f32; 4],
    /// Raw image → template homography (row-major).
    pub image_to_template: [[f64; 3]; 3],
}

/// Graded sheet.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GradeReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    sheet: Option<String>,
    questions: Vec<QuestionResult>,
    summary: GradeSummary,
    metadata: Vec<MetadataField>,
    /// The sheet looked like a filled-in key and was graded as one.
    graded_as_answer_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    alignment: Option<AlignmentInfo>,
}

impl GradeReport {
    pub(crate) fn new(
        questions: Vec<QuestionResult>,
        summary: GradeSummary,
        metadata: Vec<MetadataField>,
        graded_as_answer_key: bool,
    ) -> Self {
        Self {
            sheet: None,
            questions,
            summary,
            metadata,
            graded_as_answer_key,
            alignment: None,
        }
    }

    pub(crate) fn with_alignment(mut self, alignment: AlignmentInfo) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub(crate) fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Input name (file name or caller label), if known.
    pub fn sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    pub fn questions(&self) -> &[QuestionResult] {
        &self.questions
    }

    pub fn question(&self, number: usize) -> Option<&QuestionResult> {
        self.questions.iter().find(|q| q.question == number)
    }

    pub fn summary(&self) -> &GradeSummary {
        &self.summary
    }

    pub fn metadata(&self) -> &[MetadataField] {
        &self.metadata
    }

    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn graded_as_answer_key(&self) -> bool {
        self.graded_as_answer_key
    }

    /// `None` for sheets graded from an already aligned image.
    pub fn alignment(&self) -> Option<&AlignmentInfo> {
        self.alignment.as_ref()
    }
}
