//! Grading configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.

use std::collections::BTreeMap;
use std::path::Path;

/// How the four alignment reference points are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerMode {
    /// Largest 4-sided contour (the page outline against its background).
    Contour,
    /// Dark registration marks inside the four corner windows.
    Fiducial,
}

/// Where bubble centers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    /// Generated from the template's answer blocks.
    Fixed,
    /// Recovered from darkness projections of the aligned image.
    Inferred,
}

/// Page-outline search parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ContourParams {
    /// Gaussian pre-blur sigma in pixels (0 disables).
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Dilation radius closing small gaps in the edge map.
    pub dilate_radius: u8,
    /// Polygon approximation tolerance as a fraction of contour perimeter.
    pub approx_epsilon_frac: f64,
    /// Minimum quad area as a fraction of the image area.
    pub min_area_frac: f64,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 20.0,
            canny_high: 60.0,
            dilate_radius: 1,
            approx_epsilon_frac: 0.02,
            min_area_frac: 0.2,
        }
    }
}

/// Registration mark search around the template fiducial positions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FiducialParams {
    /// Search window width/height as a fraction of image width/height,
    /// centered on the expected mark position.
    pub window_frac: f64,
    /// Pixels strictly below this gray level count as mark pixels.
    pub dark_threshold: u8,
    /// Corners with confidence below this are logged.
    pub warn_confidence: f32,
}

impl Default for FiducialParams {
    fn default() -> Self {
        Self {
            window_frac: 0.12,
            dark_threshold: 100,
            warn_confidence: 0.5,
        }
    }
}

/// Projection-profile grid inference.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Moving-average half-width; `None` uses half the template bubble radius.
    pub smoothing_radius_px: Option<f64>,
    /// Peaks must exceed `mean(profile) * noise_floor_multiplier`.
    pub noise_floor_multiplier: f64,
    /// Peaks closer than this merge into their mean; `None` uses the bubble radius.
    pub merge_tolerance_px: Option<f64>,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            smoothing_radius_px: None,
            noise_floor_multiplier: 0.5,
            merge_tolerance_px: None,
        }
    }
}

impl InferenceParams {
    pub(crate) fn smoothing_radius(&self, bubble_radius_px: f64) -> f64 {
        self.smoothing_radius_px.unwrap_or(0.5 * bubble_radius_px)
    }

    pub(crate) fn merge_tolerance(&self, bubble_radius_px: f64) -> f64 {
        self.merge_tolerance_px.unwrap_or(bubble_radius_px)
    }
}

/// Metadata text recognition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MetadataParams {
    pub enable: bool,
    /// Per-region recognizer timeout.
    pub recognition_timeout_ms: u64,
    /// Language hints passed to the recognizer.
    pub languages: Vec<String>,
}

impl Default for MetadataParams {
    fn default() -> Self {
        Self {
            enable: true,
            recognition_timeout_ms: 5000,
            languages: vec!["tha".to_string(), "eng".to_string()],
        }
    }
}

/// Thresholds of the answer-key-as-student-sheet rule.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SelfKeyParams {
    pub enable: bool,
    /// Fraction of keyed questions decided `Multiple` that must be exceeded.
    pub min_multiple_ratio: f64,
    /// Largest top-two darkness gap still considered uniform; `None` uses
    /// `multiple_margin_threshold`.
    pub max_fill_gap: Option<f32>,
    /// Metadata values written over the recognized ones on a key sheet,
    /// by field name.
    pub metadata_labels: BTreeMap<String, String>,
}

impl Default for SelfKeyParams {
    fn default() -> Self {
        let metadata_labels = [("name", "Answer Key"), ("student_id", "000000")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            enable: true,
            min_multiple_ratio: 0.9,
            max_fill_gap: None,
            metadata_labels,
        }
    }
}

/// Points per outcome.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScoringScheme {
    pub correct: f64,
    pub wrong: f64,
    pub missing: f64,
    pub multiple: f64,
}

impl Default for ScoringScheme {
    fn default() -> Self {
        Self {
            correct: 1.0,
            wrong: 0.0,
            missing: 0.0,
            multiple: 0.0,
        }
    }
}

/// Full grading configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GradeConfig {
    /// Number of graded questions; `None` takes every question the grid yields.
    pub questions_per_sheet: Option<usize>,
    pub choices_per_question: usize,
    /// Darkness below which a question counts as unanswered.
    pub unfilled_threshold: f32,
    /// Top-two darkness gap below which a question counts as multiply marked.
    pub multiple_margin_threshold: f32,
    /// Sampling radius in pixels; `None` uses 80% of the template bubble radius.
    pub bubble_sample_radius: Option<u32>,
    pub marker_mode: MarkerMode,
    pub grid_mode: GridMode,
    /// One character per choice index, used in reports and key strings.
    pub choice_labels: String,
    pub contour: ContourParams,
    pub fiducial: FiducialParams,
    pub inference: InferenceParams,
    pub metadata: MetadataParams,
    pub self_key: SelfKeyParams,
    pub scoring: ScoringScheme,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            questions_per_sheet: None,
            choices_per_question: 5,
            unfilled_threshold: 0.15,
            multiple_margin_threshold: 0.10,
            bubble_sample_radius: None,
            marker_mode: MarkerMode::Contour,
            grid_mode: GridMode::Fixed,
            choice_labels: "ABCDE".to_string(),
            contour: ContourParams::default(),
            fiducial: FiducialParams::default(),
            inference: InferenceParams::default(),
            metadata: MetadataParams::default(),
            self_key: SelfKeyParams::default(),
            scoring: ScoringScheme::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config: {}", e),
            Self::Json(e) => write!(f, "invalid config JSON: {}", e),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl GradeConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data).map_err(ConfigError::Json)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective bubble sampling radius for a template bubble radius.
    pub fn sample_radius(&self, template_bubble_radius_px: f64) -> f64 {
        match self.bubble_sample_radius {
            Some(r) => r as f64,
            None => (0.8 * template_bubble_radius_px).max(1.0),
        }
    }

    /// Label for a 0-based choice index; falls back to the 1-based number.
    pub fn choice_label(&self, index: usize) -> String {
        self.choice_labels
            .chars()
            .nth(index)
            .map(String::from)
            .unwrap_or_else(|| (index + 1).to_string())
    }

    /// Gap bound used by the self-key rule.
    pub fn self_key_max_gap(&self) -> f32 {
        self.self_key
            .max_fill_gap
            .unwrap_or(self.multiple_margin_threshold)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.choices_per_question < 2 {
            return invalid("choices_per_question must be >= 2");
        }
        if self.questions_per_sheet == Some(0) {
            return invalid("questions_per_sheet must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.unfilled_threshold) {
            return invalid("unfilled_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.multiple_margin_threshold) {
            return invalid("multiple_margin_threshold must be in [0, 1]");
        }
        if self.bubble_sample_radius == Some(0) {
            return invalid("bubble_sample_radius must be >= 1");
        }
        if !self.choice_labels.is_empty()
            && self.choice_labels.chars().count() < self.choices_per_question
        {
            return invalid("choice_labels must name every choice (or be empty)");
        }
        let c = &self.contour;
        if !(c.approx_epsilon_frac > 0.0 && c.approx_epsilon_frac < 0.5) {
            return invalid("contour.approx_epsilon_frac must be in (0, 0.5)");
        }
        if !(0.0..1.0).contains(&c.min_area_frac) {
            return invalid("contour.min_area_frac must be in [0, 1)");
        }
        if c.canny_low > c.canny_high {
            return invalid("contour.canny_low must not exceed contour.canny_high");
        }
        if !(self.fiducial.window_frac > 0.0 && self.fiducial.window_frac <= 0.5) {
            return invalid("fiducial.window_frac must be in (0, 0.5]");
        }
        if !(self.inference.noise_floor_multiplier >= 0.0) {
            return invalid("inference.noise_floor_multiplier must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.self_key.min_multiple_ratio) {
            return invalid("self_key.min_multiple_ratio must be in [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = GradeConfig::default();
        c.validate().unwrap();
        assert_eq!(c.choices_per_question, 5);
        assert_eq!(c.marker_mode, MarkerMode::Contour);
        assert_eq!(c.grid_mode, GridMode::Fixed);
        assert!((c.self_key_max_gap() - 0.10).abs() < 1e-6);
    }

    #[test]
    fn inference_windows_scale_with_bubble_radius() {
        let mut p = InferenceParams::default();
        assert_eq!(p.smoothing_radius(12.0), 6.0);
        assert_eq!(p.merge_tolerance(12.0), 12.0);
        p.smoothing_radius_px = Some(3.0);
        assert_eq!(p.smoothing_radius(12.0), 3.0);
    }

    #[test]
    fn key_sheet_labels_default_to_name_and_id() {
        let labels = &GradeConfig::default().self_key.metadata_labels;
        assert_eq!(labels.get("name").map(String::as_str), Some("Answer Key"));
        assert_eq!(labels.get("student_id").map(String::as_str), Some("000000"));
        let c = GradeConfig::from_json_str(r#"{"self_key":{"metadata_labels":{}}}"#).unwrap();
        assert!(c.self_key.metadata_labels.is_empty());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = GradeConfig::from_json_str(
            r#"{"marker_mode":"fiducial","grid_mode":"inferred","questions_per_sheet":20,
                "fiducial":{"dark_threshold":80}}"#,
        )
        .unwrap();
        assert_eq!(c.marker_mode, MarkerMode::Fiducial);
        assert_eq!(c.grid_mode, GridMode::Inferred);
        assert_eq!(c.questions_per_sheet, Some(20));
        assert_eq!(c.fiducial.dark_threshold, 80);
        assert!((c.fiducial.window_frac - 0.12).abs() < 1e-12);
        assert!((c.unfilled_threshold - 0.15).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let err = GradeConfig::from_json_str(r#"{"unfilled_threshold":1.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = GradeConfig::from_json_str(r#"{"choices_per_question":6}"#).unwrap_err();
        assert!(err.to_string().contains("choice_labels"));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let err = GradeConfig::from_json_str(r#"{"marker_mode":"aruco"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn choice_labels_fall_back_to_numbers() {
        let mut c = GradeConfig::default();
        assert_eq!(c.choice_label(2), "C");
        c.choice_labels.clear();
        assert_eq!(c.choice_label(2), "3");
    }

    #[test]
    fn sample_radius_tracks_template() {
        let mut c = GradeConfig::default();
        assert!((c.sample_radius(10.0) - 8.0).abs() < 1e-12);
        c.bubble_sample_radius = Some(6);
        assert!((c.sample_radius(10.0) - 6.0).abs() < 1e-12);
    }
}
