//! Media types
//!
//! This module provides:
//! - The normalized RGB [`Frame`] and host pixel conversion
//! - Fallback frame sources used before the pipeline produces anything

pub mod frame;
pub mod source;

pub use frame::{Frame, PixelData, RGB_CHANNELS};
pub use source::{load_image, FallbackSource, FolderFrameSource, StaticFrameSource};
