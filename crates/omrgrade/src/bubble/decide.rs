use super::score::BubbleScore;

/// What a question's bubbles say.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Selected { choice: usize },
    NoAnswer,
    /// Several bubbles are dark and too close to call.
    Multiple { choices: Vec<usize> },
}

impl Answer {
    pub fn selected(&self) -> Option<usize> {
        match self {
            Self::Selected { choice } => Some(*choice),
            _ => None,
        }
    }
}

/// Decision plus the evidence it was made on.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnswerDecision {
    pub answer: Answer,
    /// Top darkness minus the unfilled threshold, or the top-two gap for
    /// `Multiple`.
    pub margin: f32,
    /// Top darkness minus second darkness (top darkness with one choice).
    pub darkness_gap: f32,
}

/// Turns bubble scores into an [`AnswerDecision`].
#[derive(Debug, Clone, Copy)]
pub struct AnswerDecider {
    unfilled_threshold: f32,
    multiple_margin: f32,
}

impl AnswerDecider {
    pub fn new(unfilled_threshold: f32, multiple_margin: f32) -> Self {
        Self {
            unfilled_threshold,
            multiple_margin,
        }
    }

    /// Always yields a decision.
    ///
    /// - top darkness below the unfilled threshold: `NoAnswer`;
    /// - second darkness also filled and within the multiple margin of the
    ///   top: `Multiple` with every filled index inside the margin;
    /// - otherwise the darkest index (first one on ties).
    pub fn decide(&self, scores: &[BubbleScore]) -> AnswerDecision {
        let darkness: Vec<f32> = scores.iter().map(|s| s.darkness()).collect();
        let Some((top, d1)) = darkness
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
                Some((_, bd)) if bd >= d => best,
                _ => Some((i, d)),
            })
        else {
            return AnswerDecision {
                answer: Answer::NoAnswer,
                margin: -self.unfilled_threshold,
                darkness_gap: 0.0,
            };
        };
        let d2 = darkness
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != top)
            .map(|(_, &d)| d)
            .fold(f32::NEG_INFINITY, f32::max);
        let gap = if d2.is_finite() { d1 - d2 } else { d1 };

        if d1 < self.unfilled_threshold {
            return AnswerDecision {
                answer: Answer::NoAnswer,
                margin: d1 - self.unfilled_threshold,
                darkness_gap: gap,
            };
        }
        if d2 >= self.unfilled_threshold && gap < self.multiple_margin {
            let choices = darkness
                .iter()
                .enumerate()
                .filter(|&(_, &d)| d >= self.unfilled_threshold && d1 - d < self.multiple_margin)
                .map(|(i, _)| i)
                .collect();
            return AnswerDecision {
                answer: Answer::Multiple { choices },
                margin: gap,
                darkness_gap: gap,
            };
        }
        AnswerDecision {
            answer: Answer::Selected { choice: top },
            margin: d1 - self.unfilled_threshold,
            darkness_gap: gap,
        }
    }
}
