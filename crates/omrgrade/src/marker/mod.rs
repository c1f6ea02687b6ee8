//! Alignment reference points in the raw image.

mod contour;
mod fiducial;

pub use fiducial::FiducialAnchors;

use image::GrayImage;

use crate::config::{ContourParams, FiducialParams, GradeConfig, MarkerMode};
use crate::geometry::{ImageSpace, Quad, QuadDefect, TemplateSpace};
use crate::template::TemplateLayout;

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerNotFoundError {
    /// Contour mode: no contour simplified to a usable quadrilateral.
    NoQuadrilateral { contours: usize },
    /// Fiducial mode: every search window is free of dark pixels.
    NoDarkPixels { threshold: u8 },
    /// Located corners do not form a usable quadrilateral.
    InvalidQuad(QuadDefect),
}

impl std::fmt::Display for MarkerNotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoQuadrilateral { contours } => write!(
                f,
                "no 4-sided page outline among {} contours",
                contours
            ),
            Self::NoDarkPixels { threshold } => write!(
                f,
                "no pixel below gray level {} in any fiducial window",
                threshold
            ),
            Self::InvalidQuad(defect) => write!(f, "located markers are unusable: {}", defect),
        }
    }
}

impl std::error::Error for MarkerNotFoundError {}

/// Four reference points found in the raw image.
#[derive(Debug, Clone)]
pub struct MarkerDetection {
    /// Ordered TL, TR, BR, BL.
    pub quad: Quad<ImageSpace>,
    pub mode: MarkerMode,
    /// Per-corner confidence in `[0, 1]`; always 1 for contour mode.
    pub corner_confidence: [f32; 4],
}

impl MarkerDetection {
    pub fn min_confidence(&self) -> f32 {
        self.corner_confidence
            .iter()
            .copied()
            .fold(1.0, f32::min)
    }
}

/// Finds the alignment quad with the configured strategy.
#[derive(Debug, Clone)]
pub struct MarkerLocator {
    mode: MarkerMode,
    contour: ContourParams,
    fiducial: FiducialParams,
    anchors: FiducialAnchors,
}

impl MarkerLocator {
    pub fn new(
        mode: MarkerMode,
        contour: ContourParams,
        fiducial: FiducialParams,
        anchors: FiducialAnchors,
    ) -> Self {
        Self {
            mode,
            contour,
            fiducial,
            anchors,
        }
    }

    /// Fiducial windows are placed where `template` prints its marks.
    pub fn from_config(config: &GradeConfig, template: &TemplateLayout) -> Self {
        Self::new(
            config.marker_mode,
            config.contour.clone(),
            config.fiducial.clone(),
            template.fiducial_anchors(),
        )
    }

    pub fn mode(&self) -> MarkerMode {
        self.mode
    }

    pub fn locate(&self, img: &GrayImage) -> Result<MarkerDetection, MarkerNotFoundError> {
        let (quad, corner_confidence) = match self.mode {
            MarkerMode::Contour => (contour::locate_page(img, &self.contour)?, [1.0; 4]),
            MarkerMode::Fiducial => fiducial::locate_fiducials(img, &self.anchors, &self.fiducial)?,
        };
        quad.validate().map_err(MarkerNotFoundError::InvalidQuad)?;
        Ok(MarkerDetection {
            quad,
            mode: self.mode,
            corner_confidence,
        })
    }

    /// Template-space counterpart of the located quad.
    pub fn template_quad(&self, template: &TemplateLayout) -> Quad<TemplateSpace> {
        match self.mode {
            MarkerMode::Contour => template.page_quad(),
            MarkerMode::Fiducial => template.fiducial_quad(),
        }
    }
}
