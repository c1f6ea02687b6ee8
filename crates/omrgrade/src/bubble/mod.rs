//! Bubble sampling and per-question decisions.

mod decide;
mod score;

pub use decide::{Answer, AnswerDecider, AnswerDecision};
pub use score::{score_bubble, score_slot, BubbleScore};
