pub mod config;
pub mod cpu;

use ndarray::{Array, IxDyn};
use thiserror::Error;

pub use config::DEFAULT_INPUT_SIZE;
pub use cpu::CpuPreProcessor;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image has zero width or height ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected}, got {actual} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Resize failed: {0}")]
    Resize(String),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Parameters needed to map a point in the letterboxed network input back to
/// the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    /// Uniform scale factor applied during resize
    pub scale: f32,
    /// X padding in input pixels
    pub offset_x: f32,
    /// Y padding in input pixels
    pub offset_y: f32,
    pub orig_width: u32,
    pub orig_height: u32,
}

impl LetterboxTransform {
    /// Identity mapping for an image already at network resolution.
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            orig_width: width,
            orig_height: height,
        }
    }

    #[inline]
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale,
            (y - self.offset_y) / self.scale,
        )
    }
}

/// Result of preprocessing including transformation parameters
#[derive(Debug)]
pub struct PreprocessResult {
    /// Normalized image in HWC layout, without a batch axis
    pub tensor: Array<f32, IxDyn>,
    pub transform: LetterboxTransform,
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Preprocess an image for inference
    ///
    /// # Arguments
    /// * `pixels` - RGB pixel data in HWC format
    /// * `width` - Image width
    /// * `height` - Image height
    fn preprocess(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PreprocessResult, PreprocessError>;

    /// Get the input size this preprocessor targets
    fn input_size(&self) -> (u32, u32);
}
