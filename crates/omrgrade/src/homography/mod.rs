//! Homography estimation, projection, and perspective rectification.

mod core;
mod warp;

pub use core::{estimate_homography_dlt, project_raw, Homography, HomographyError};
pub use warp::{AlignedSheet, PerspectiveAligner};

pub(crate) use core::matrix3_to_array;
pub(crate) use warp::projection_from;
