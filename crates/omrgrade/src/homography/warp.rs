//! Resampling a raw sheet photo into template pixel space.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::geometry::{ImageSpace, Quad, TemplateSpace};

use super::core::{Homography, HomographyError};

/// Gray level used for template pixels that fall outside the raw image.
const PAPER_WHITE: u8 = 255;

/// Aligned sheet plus the mapping that produced it.
#[derive(Debug, Clone)]
pub struct AlignedSheet {
    pub image: GrayImage,
    /// Raw image → template mapping.
    pub image_to_template: Homography<ImageSpace, TemplateSpace>,
}

/// Rectifies raw images onto a fixed-size template canvas.
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveAligner {
    width: u32,
    height: u32,
}

impl PerspectiveAligner {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Solve the raw→template mapping from four matched corners.
    pub fn solve(
        &self,
        raw: &Quad<ImageSpace>,
        template: &Quad<TemplateSpace>,
    ) -> Result<Homography<ImageSpace, TemplateSpace>, HomographyError> {
        Homography::estimate(raw.corners(), template.corners())
    }

    /// Compute the mapping and resample `raw` into template dimensions with
    /// bicubic interpolation.
    pub fn align(
        &self,
        raw: &GrayImage,
        raw_quad: &Quad<ImageSpace>,
        template_quad: &Quad<TemplateSpace>,
    ) -> Result<AlignedSheet, HomographyError> {
        let h = self.solve(raw_quad, template_quad)?;
        let image = self.warp(raw, &h)?;
        Ok(AlignedSheet {
            image,
            image_to_template: h,
        })
    }

    /// Resample with an already known raw→template mapping.
    pub fn warp(
        &self,
        raw: &GrayImage,
        h: &Homography<ImageSpace, TemplateSpace>,
    ) -> Result<GrayImage, HomographyError> {
        let projection = projection_from(h)?;
        let mut out = GrayImage::from_pixel(self.width, self.height, Luma([PAPER_WHITE]));
        warp_into(
            raw,
            &projection,
            Interpolation::Bicubic,
            Luma([PAPER_WHITE]),
            &mut out,
        );
        Ok(out)
    }
}

/// `imageproc` projections map input pixels to output pixels, matching the
/// direction of `h`.
pub(crate) fn projection_from<Src: Copy, Dst: Copy>(
    h: &Homography<Src, Dst>,
) -> Result<Projection, HomographyError> {
    let a = h.to_array();
    let flat = [
        a[0][0] as f32,
        a[0][1] as f32,
        a[0][2] as f32,
        a[1][0] as f32,
        a[1][1] as f32,
        a[1][2] as f32,
        a[2][0] as f32,
        a[2][1] as f32,
        a[2][2] as f32,
    ];
    Projection::from_matrix(flat)
        .ok_or_else(|| HomographyError::Degenerate("projection matrix is not invertible".into()))
}
