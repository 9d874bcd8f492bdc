//! Core types and utilities for answer-sheet calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! know about exams, templates or any particular image decoder.

mod homography;
mod image;
mod logger;
mod transform;

pub use homography::{estimate_homography, homography_from_4pt, warp_gray};
pub use image::{GrayImage, GrayImageView, ImageError, ImageView, PixelFormat};
pub use transform::{TransformMatrix, TransformModel};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, init_tracing_with_level};

pub use logger::init_with_level;
