//! Expected choice per question.
//!
//! Key JSON follows `omrgrade.key.v1`:
//! `{ "schema": "omrgrade.key.v1", "answers": [{ "question": 1, "choice": 0 }, ...] }`.
//! Questions are 1-based and strictly increasing; choices are 0-based.
//!
//! Keys can also be read from a `question,answer` CSV table whose answers
//! are choice labels.

use std::collections::HashMap;
use std::path::Path;

pub(crate) const KEY_SCHEMA_V1: &str = "omrgrade.key.v1";

/// One keyed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyEntry {
    pub question: usize,
    pub choice: usize,
}

#[derive(Debug)]
pub enum AnswerKeyError {
    Empty,
    /// Question numbers start at 1.
    ZeroQuestion,
    /// Entries must be strictly increasing by question.
    OutOfOrder { previous: usize, question: usize },
    ChoiceOutOfRange { question: usize, choice: usize, choices: usize },
    UnknownLabel { position: usize, label: char },
    /// A key sheet question was not decided as a single selection.
    UnreadableKeySheet { question: usize, decision: String },
    /// CSV row `row` (1-based, header included) is not `question,label`.
    InvalidRow { row: usize, message: String },
    Schema(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for AnswerKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "answer key has no entries"),
            Self::ZeroQuestion => write!(f, "answer key question numbers start at 1"),
            Self::OutOfOrder { previous, question } => write!(
                f,
                "answer key question {} follows question {}; questions must be unique and increasing",
                question, previous
            ),
            Self::ChoiceOutOfRange {
                question,
                choice,
                choices,
            } => write!(
                f,
                "answer key question {} has choice {} but questions have {} choices",
                question, choice, choices
            ),
            Self::UnknownLabel { position, label } => write!(
                f,
                "unknown choice label '{}' at position {}",
                label, position
            ),
            Self::UnreadableKeySheet { question, decision } => write!(
                f,
                "key sheet question {} is not a single mark ({})",
                question, decision
            ),
            Self::InvalidRow { row, message } => {
                write!(f, "answer key CSV row {}: {}", row, message)
            }
            Self::Schema(msg) => write!(f, "{}", msg),
            Self::Io(e) => write!(f, "failed to read answer key: {}", e),
            Self::Json(e) => write!(f, "invalid answer key JSON: {}", e),
            Self::Csv(e) => write!(f, "invalid answer key CSV: {}", e),
        }
    }
}

impl std::error::Error for AnswerKeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Csv(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct KeySpecV1 {
    schema: String,
    answers: Vec<KeyEntry>,
}

/// Immutable question → choice mapping in question order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerKey {
    entries: Vec<KeyEntry>,
    index: HashMap<usize, usize>,
}

impl AnswerKey {
    /// Build from `(question, choice)` pairs.
    pub fn from_pairs(pairs: &[(usize, usize)]) -> Result<Self, AnswerKeyError> {
        Self::from_entries(
            pairs
                .iter()
                .map(|&(question, choice)| KeyEntry { question, choice })
                .collect(),
        )
    }

    /// Choice `i` answers question `i + 1`.
    pub fn from_choices(choices: &[usize]) -> Result<Self, AnswerKeyError> {
        Self::from_entries(
            choices
                .iter()
                .enumerate()
                .map(|(i, &choice)| KeyEntry {
                    question: i + 1,
                    choice,
                })
                .collect(),
        )
    }

    /// Parse a label string such as `"ABCDA"` (or `"a, b, c"`) against the
    /// configured labels. Whitespace and commas are ignored; letters match
    /// case-insensitively.
    pub fn from_label_string(text: &str, labels: &str) -> Result<Self, AnswerKeyError> {
        let labels = upper_labels(labels);
        let mut choices = Vec::new();
        for (position, c) in text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .enumerate()
        {
            let choice = label_position(&labels, c)
                .ok_or(AnswerKeyError::UnknownLabel { position, label: c })?;
            choices.push(choice);
        }
        Self::from_choices(&choices)
    }

    /// Load a key file: `.csv` files are read as label tables, anything
    /// else as `omrgrade.key.v1` JSON.
    pub fn from_path(path: &Path, labels: &str) -> Result<Self, AnswerKeyError> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            Self::from_csv_file(path, labels)
        } else {
            Self::from_json_file(path)
        }
    }

    pub fn from_csv_file(path: &Path, labels: &str) -> Result<Self, AnswerKeyError> {
        let file = std::fs::File::open(path).map_err(AnswerKeyError::Io)?;
        Self::from_csv_reader(file, labels)
    }

    /// Read a `question,answer` table with a header row. Questions may carry
    /// a `Q` prefix, answers are choice labels, and rows may come in any
    /// order. Columns past the second are ignored.
    pub fn from_csv_reader<R: std::io::Read>(
        reader: R,
        labels: &str,
    ) -> Result<Self, AnswerKeyError> {
        let labels = upper_labels(labels);
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let mut pairs = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(AnswerKeyError::Csv)?;
            let row = i + 2;
            let invalid = |message: String| AnswerKeyError::InvalidRow { row, message };
            let (Some(question), Some(answer)) = (record.get(0), record.get(1)) else {
                return Err(invalid("expected question and answer columns".to_string()));
            };
            let number = question
                .trim_start_matches(|c: char| c.eq_ignore_ascii_case(&'q'))
                .parse::<usize>()
                .map_err(|_| invalid(format!("bad question number '{}'", question)))?;
            let mut chars = answer.chars();
            let choice = match (chars.next(), chars.next()) {
                (Some(c), None) => label_position(&labels, c),
                _ => None,
            }
            .ok_or_else(|| invalid(format!("unknown choice label '{}'", answer)))?;
            pairs.push((number, choice));
        }
        pairs.sort_by_key(|&(question, _)| question);
        Self::from_pairs(&pairs)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AnswerKeyError> {
        let data = std::fs::read_to_string(path).map_err(AnswerKeyError::Io)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, AnswerKeyError> {
        let spec: KeySpecV1 = serde_json::from_str(data).map_err(AnswerKeyError::Json)?;
        if spec.schema != KEY_SCHEMA_V1 {
            return Err(AnswerKeyError::Schema(format!(
                "unsupported answer key schema '{}' (expected '{}')",
                spec.schema, KEY_SCHEMA_V1
            )));
        }
        Self::from_entries(spec.answers)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&KeySpecV1 {
            schema: KEY_SCHEMA_V1.to_string(),
            answers: self.entries.clone(),
        })
    }

    fn from_entries(entries: Vec<KeyEntry>) -> Result<Self, AnswerKeyError> {
        if entries.is_empty() {
            return Err(AnswerKeyError::Empty);
        }
        let mut previous = 0usize;
        for e in &entries {
            if e.question == 0 {
                return Err(AnswerKeyError::ZeroQuestion);
            }
            if e.question <= previous {
                return Err(AnswerKeyError::OutOfOrder {
                    previous,
                    question: e.question,
                });
            }
            previous = e.question;
        }
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.question, i))
            .collect();
        Ok(Self { entries, index })
    }

    /// Expected choice for a 1-based question.
    pub fn get(&self, question: usize) -> Option<usize> {
        self.index.get(&question).map(|&i| self.entries[i].choice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    /// Check every choice against the per-question choice count.
    pub fn validate_choices(&self, choices: usize) -> Result<(), AnswerKeyError> {
        match self.entries.iter().find(|e| e.choice >= choices) {
            Some(e) => Err(AnswerKeyError::ChoiceOutOfRange {
                question: e.question,
                choice: e.choice,
                choices,
            }),
            None => Ok(()),
        }
    }
}

fn upper_labels(labels: &str) -> Vec<char> {
    labels.chars().flat_map(char::to_uppercase).collect()
}

fn label_position(upper_labels: &[char], c: char) -> Option<usize> {
    let upper = c.to_uppercase().next().unwrap_or(c);
    upper_labels.iter().position(|&l| l == upper)
}
