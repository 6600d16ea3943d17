use crate::config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR};
use crate::{LetterboxTransform, Preprocess, PreprocessError, PreprocessResult};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array, IxDyn};

pub struct CpuPreProcessor {
    pub input_size: (u32, u32),
    letterboxed_buffer: Vec<u8>,
}

impl CpuPreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            letterboxed_buffer: vec![LETTERBOX_COLOR; (input_size.0 * input_size.1 * 3) as usize],
        }
    }

    pub fn preprocess_from_u8_slice(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<(Array<f32, IxDyn>, LetterboxTransform), PreprocessError> {
        let _s = span!("preprocess_image");

        tracing::trace!(
            width,
            height,
            pixel_bytes = pixels.len(),
            "Preprocessing image dimensions"
        );

        if width == 0 || height == 0 {
            return Err(PreprocessError::EmptyImage { width, height });
        }

        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(PreprocessError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let transform = self.resize_and_letterbox(pixels, width, height)?;
        let input = self.normalize()?;

        Ok((input, transform))
    }

    fn resize_and_letterbox(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<LetterboxTransform, PreprocessError> {
        let _s = span!("resize_and_letterbox");

        let (in_w, in_h) = self.input_size;
        // f64 keeps floor(scale * side) exact for common sizes (416/800 * 600 = 312)
        let scale = (in_w as f64 / width as f64).min(in_h as f64 / height as f64);
        let new_width = ((width as f64 * scale) as u32).clamp(1, in_w);
        let new_height = ((height as f64 * scale) as u32).clamp(1, in_h);

        let offset_x = (in_w - new_width) / 2;
        let offset_y = (in_h - new_height) / 2;

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;

        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        Resizer::new()
            .resize(
                &src,
                &mut resized,
                &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
            )
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let stride = in_w * 3;
        let row_bytes = (new_width * 3) as usize;

        for y in 0..new_height {
            let src_row = (y * new_width * 3) as usize;
            let dst_row = ((y + offset_y) * stride + offset_x * 3) as usize;

            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        Ok(LetterboxTransform {
            scale: scale as f32,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
            orig_width: width,
            orig_height: height,
        })
    }

    /// Scale to [0, 1] and keep HWC order, which is what the exported model expects.
    fn normalize(&self) -> Result<Array<f32, IxDyn>, PreprocessError> {
        let _s = span!("normalize");

        let (in_w, in_h) = self.input_size;
        let output: Vec<f32> = self
            .letterboxed_buffer
            .iter()
            .map(|&px| px as f32 / 255.0)
            .collect();

        Ok(Array::from_shape_vec(
            IxDyn(&[in_h as usize, in_w as usize, 3]),
            output,
        )?)
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PreprocessResult, PreprocessError> {
        let (tensor, transform) = self.preprocess_from_u8_slice(pixels, width, height)?;
        Ok(PreprocessResult { tensor, transform })
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}
