//! Tabular export: one row per question, sheets stacked.
//!
//! Columns are `sheet, question, selected, correct_answer, result`, followed
//! by one column per metadata field in first-seen order.

use std::io::Write;

use super::result::GradeReport;
use crate::bubble::Answer;
use crate::config::GradeConfig;

pub const BASE_COLUMNS: [&str; 5] = ["sheet", "question", "selected", "correct_answer", "result"];

/// Metadata field names over all reports, in first-seen order.
pub fn metadata_columns(reports: &[GradeReport]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for field in reports.iter().flat_map(|r| r.metadata()) {
        if !names.contains(&field.name) {
            names.push(field.name.clone());
        }
    }
    names
}

pub fn header(reports: &[GradeReport]) -> Vec<String> {
    BASE_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(metadata_columns(reports))
        .collect()
}

/// Selected labels; several marks are joined with `|`, blanks are empty.
fn answer_cell(answer: &Answer, config: &GradeConfig) -> String {
    match answer {
        Answer::Selected { choice } => config.choice_label(*choice),
        Answer::NoAnswer => String::new(),
        Answer::Multiple { choices } => choices
            .iter()
            .map(|&c| config.choice_label(c))
            .collect::<Vec<_>>()
            .join("|"),
    }
}

/// Rows of one report; `position` (1-based) names sheets without a name.
pub fn report_rows(
    report: &GradeReport,
    position: usize,
    metadata_columns: &[String],
    config: &GradeConfig,
) -> Vec<Vec<String>> {
    let sheet = report
        .sheet()
        .map(str::to_string)
        .unwrap_or_else(|| position.to_string());
    let meta: Vec<String> = metadata_columns
        .iter()
        .map(|name| report.metadata_value(name).unwrap_or_default().to_string())
        .collect();
    report
        .questions()
        .iter()
        .map(|q| {
            let mut row = vec![
                sheet.clone(),
                q.question.to_string(),
                answer_cell(&q.decision.answer, config),
                q.key.map(|k| config.choice_label(k)).unwrap_or_default(),
                q.outcome.as_str().to_string(),
            ];
            row.extend(meta.iter().cloned());
            row
        })
        .collect()
}

/// Write every report as CSV with a single header row.
pub fn write_csv<W: Write>(
    writer: W,
    reports: &[GradeReport],
    config: &GradeConfig,
) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    let meta = metadata_columns(reports);
    out.write_record(header(reports))?;
    for (i, report) in reports.iter().enumerate() {
        for row in report_rows(report, i + 1, &meta, config) {
            out.write_record(&row)?;
        }
    }
    out.flush()?;
    Ok(())
}
