//! Text fields (name, student ID, ...) read from fixed regions of the
//! aligned sheet through a pluggable recognizer.
//!
//! Recognition never fails a sheet: errors, timeouts and unreadable output
//! all produce an empty value and a warning.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;

use crate::config::MetadataParams;
use crate::template::MetadataRegion;

/// Hints forwarded to the recognizer with every region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionHints {
    /// Language codes, e.g. `["tha", "eng"]`.
    pub languages: Vec<String>,
    pub digits_only: bool,
    pub single_line: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// The engine could not be run at all.
    Unavailable(String),
    Failed(String),
    Timeout(Duration),
}

impl std::fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "text recognizer unavailable: {}", msg),
            Self::Failed(msg) => write!(f, "text recognition failed: {}", msg),
            Self::Timeout(d) => write!(f, "text recognition timed out after {:?}", d),
        }
    }
}

impl std::error::Error for RecognitionError {}

/// External OCR capability: image region in, raw text out.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, region: &GrayImage, hints: &RecognitionHints)
        -> Result<String, RecognitionError>;
}

/// One extracted field; an empty value means nothing usable was read.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// Crops, binarizes, recognizes and parses every metadata region.
#[derive(Clone)]
pub struct MetadataExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    timeout: Duration,
    languages: Vec<String>,
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractor")
            .field("timeout", &self.timeout)
            .field("languages", &self.languages)
            .finish_non_exhaustive()
    }
}

impl MetadataExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, params: &MetadataParams) -> Self {
        Self {
            recognizer,
            timeout: Duration::from_millis(params.recognition_timeout_ms),
            languages: params.languages.clone(),
        }
    }

    /// Fields in region order.
    pub fn extract(&self, aligned: &GrayImage, regions: &[MetadataRegion]) -> Vec<MetadataField> {
        regions
            .iter()
            .map(|region| MetadataField {
                name: region.name.clone(),
                value: self.extract_one(aligned, region),
            })
            .collect()
    }

    fn extract_one(&self, aligned: &GrayImage, region: &MetadataRegion) -> String {
        let (w, h) = aligned.dimensions();
        let Some(rect) = region.rect.clip_to(w, h) else {
            tracing::warn!("metadata region '{}' is outside the sheet", region.name);
            return String::new();
        };
        let crop =
            image::imageops::crop_imm(aligned, rect.x, rect.y, rect.width, rect.height).to_image();
        let hints = RecognitionHints {
            languages: self.languages.clone(),
            digits_only: region.digits_only,
            single_line: true,
        };
        match recognize_with_timeout(
            Arc::clone(&self.recognizer),
            binarize(&crop),
            hints,
            self.timeout,
        ) {
            Ok(raw) => {
                let value = parse_field(&raw, region);
                tracing::debug!("metadata '{}': {:?} -> {:?}", region.name, raw, value);
                value
            }
            Err(e) => {
                tracing::warn!("metadata '{}': {}", region.name, e);
                String::new()
            }
        }
    }
}

/// Otsu threshold: pixels above the level become white, the rest black.
pub fn binarize(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        *p = if p[0] > level { Luma([255]) } else { Luma([0]) };
    }
    out
}

/// Run the recognizer on a worker thread and give up after `timeout`.
///
/// A timed-out worker is left to finish on its own; its result is dropped.
pub fn recognize_with_timeout(
    recognizer: Arc<dyn TextRecognizer>,
    region: GrayImage,
    hints: RecognitionHints,
    timeout: Duration,
) -> Result<String, RecognitionError> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("omr-recognize".to_string())
        .spawn(move || {
            let _ = tx.send(recognizer.recognize(&region, &hints));
        })
        .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(RecognitionError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RecognitionError::Failed(
            "recognizer worker exited without a result".to_string(),
        )),
    }
}

fn strip_prefix_ignore_ascii_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Turn raw recognizer output into a field value.
///
/// Lines are joined, the longest matching label is stripped, the text after
/// the last delimiter is kept and trimmed of fill-in dots and underscores.
/// Digit-only fields drop everything but ASCII digits. Output without any
/// letter or digit is treated as noise and becomes empty.
pub fn parse_field(raw: &str, region: &MetadataRegion) -> String {
    let joined = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut labels: Vec<&str> = region.labels.iter().map(String::as_str).collect();
    labels.sort_by_key(|l| std::cmp::Reverse(l.chars().count()));
    let mut text = joined.as_str();
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_ascii_case(text, label) {
            text = rest;
            break;
        }
    }

    let tail = text.rsplit(region.delimiter).next().unwrap_or(text);
    let value = tail
        .trim_matches(|c: char| c.is_whitespace() || c == '_' || c == '.')
        .to_string();

    let value = if region.digits_only {
        value.chars().filter(char::is_ascii_digit).collect()
    } else {
        value
    };
    if !value.chars().any(char::is_alphanumeric) {
        return String::new();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelRect;

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn recognize(
            &self,
            _region: &GrayImage,
            _hints: &RecognitionHints,
        ) -> Result<String, RecognitionError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl TextRecognizer for Broken {
        fn recognize(
            &self,
            _region: &GrayImage,
            _hints: &RecognitionHints,
        ) -> Result<String, RecognitionError> {
            Err(RecognitionError::Failed("engine crashed".into()))
        }
    }

    struct Slow;

    impl TextRecognizer for Slow {
        fn recognize(
            &self,
            _region: &GrayImage,
            _hints: &RecognitionHints,
        ) -> Result<String, RecognitionError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok("too late".into())
        }
    }

    /// Echoes the hints so tests can check what was passed.
    struct HintEcho;

    impl TextRecognizer for HintEcho {
        fn recognize(
            &self,
            region: &GrayImage,
            hints: &RecognitionHints,
        ) -> Result<String, RecognitionError> {
            Ok(format!(
                "{}x{} {} {}",
                region.width(),
                region.height(),
                hints.languages.join("+"),
                hints.digits_only
            ))
        }
    }

    fn region(name: &str, labels: &[&str], digits_only: bool) -> MetadataRegion {
        MetadataRegion::new(name, PixelRect::new(0, 0, 40, 20), labels, digits_only)
    }

    fn extractor(rec: Arc<dyn TextRecognizer>, timeout_ms: u64) -> MetadataExtractor {
        let params = MetadataParams {
            recognition_timeout_ms: timeout_ms,
            ..MetadataParams::default()
        };
        MetadataExtractor::new(rec, &params)
    }

    #[test]
    fn english_label_and_delimiter_are_stripped() {
        let r = region("name", &["Name", "ชื่อ"], false);
        assert_eq!(parse_field("NAME: John Smith\n", &r), "John Smith");
        assert_eq!(parse_field("name :  Jane ____", &r), "Jane");
    }

    #[test]
    fn thai_label_is_stripped() {
        let r = region("name", &["Name", "ชื่อ"], false);
        assert_eq!(parse_field("ชื่อ สมชาย ใจดี", &r), "สมชาย ใจดี");
    }

    #[test]
    fn longest_label_wins() {
        let r = region("subject_code", &["Subject", "Subject Code"], false);
        assert_eq!(parse_field("Subject Code CS101", &r), "CS101");
    }

    #[test]
    fn digits_only_field_keeps_digits() {
        let r = region("student_id", &["Student ID", "รหัสนักศึกษา"], true);
        assert_eq!(parse_field("Student ID: 64-0123 45", &r), "64012345");
        assert_eq!(parse_field("รหัสนักศึกษา 6401234", &r), "6401234");
    }

    #[test]
    fn trailing_segment_after_last_delimiter() {
        let r = region("date", &[], false);
        assert_eq!(parse_field("Exam: Date: 12/03/2024", &r), "12/03/2024");
    }

    #[test]
    fn empty_or_garbled_text_is_empty() {
        let r = region("name", &["Name"], false);
        assert_eq!(parse_field("", &r), "");
        assert_eq!(parse_field("  \n \n", &r), "");
        assert_eq!(parse_field("~~ |: ;' ..__", &r), "");
        assert_eq!(parse_field("Name:", &r), "");
        let id = region("student_id", &[], true);
        assert_eq!(parse_field("abc", &id), "");
    }

    #[test]
    fn extractor_returns_fields_in_region_order() {
        let img = GrayImage::from_pixel(100, 60, Luma([255]));
        let regions = vec![
            region("name", &["Name"], false),
            MetadataRegion::new("id", PixelRect::new(80, 40, 50, 50), &[], false),
        ];
        let ex = extractor(Arc::new(HintEcho), 2000);
        let fields = ex.extract(&img, &regions);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "name");
        assert_eq!(fields[0].value, "40x20 tha+eng false");
        // Clipped to the sheet.
        assert_eq!(fields[1].value, "20x20 tha+eng false");
    }

    #[test]
    fn garbled_recognizer_output_gives_empty_field() {
        let img = GrayImage::from_pixel(100, 60, Luma([255]));
        let ex = extractor(Arc::new(FixedText("|||~~")), 2000);
        let fields = ex.extract(&img, &[region("name", &["Name"], false)]);
        assert_eq!(fields[0].value, "");
    }

    #[test]
    fn recognizer_error_gives_empty_field() {
        let img = GrayImage::from_pixel(100, 60, Luma([255]));
        let ex = extractor(Arc::new(Broken), 2000);
        let fields = ex.extract(&img, &[region("name", &[], false)]);
        assert_eq!(fields[0].value, "");
    }

    #[test]
    fn timeout_gives_empty_field() {
        let img = GrayImage::from_pixel(100, 60, Luma([255]));
        let ex = extractor(Arc::new(Slow), 20);
        let fields = ex.extract(&img, &[region("name", &[], false)]);
        assert_eq!(fields[0].value, "");
        let err = recognize_with_timeout(
            Arc::new(Slow),
            GrayImage::new(4, 4),
            RecognitionHints {
                languages: vec![],
                digits_only: false,
                single_line: true,
            },
            Duration::from_millis(20),
        )
        .unwrap_err();
        assert_eq!(err, RecognitionError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn region_outside_sheet_gives_empty_field() {
        let img = GrayImage::from_pixel(50, 50, Luma([255]));
        let ex = extractor(Arc::new(FixedText("Name: X")), 2000);
        let r = MetadataRegion::new("name", PixelRect::new(60, 60, 10, 10), &[], false);
        assert_eq!(ex.extract(&img, &[r])[0].value, "");
    }

    #[test]
    fn binarize_splits_two_levels() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([200]));
        for x in 0..5 {
            for y in 0..10 {
                img.put_pixel(x, y, Luma([40]));
            }
        }
        let b = binarize(&img);
        assert_eq!(b.get_pixel(0, 0)[0], 0);
        assert_eq!(b.get_pixel(9, 9)[0], 255);
    }
}
