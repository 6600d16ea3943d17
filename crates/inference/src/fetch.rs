use crate::config::FetchConfig;
use crate::error::DetectError;
use std::future::Future;
use std::time::Duration;

/// Decoded RGB image, packed row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Source of request images. Every failure surfaces as `DetectError::Fetch`.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedImage, DetectError>> + Send;
}

/// Downloads an image over HTTP(S) and decodes it to RGB8.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_image_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            max_image_bytes: config.max_image_bytes,
        })
    }
}

impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, DetectError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DetectError::Fetch(format!("GET {}: {}", url, e)))?;

        if let Some(len) = response
            .content_length()
            .filter(|len| *len as usize > self.max_image_bytes)
        {
            return Err(DetectError::Fetch(format!(
                "image is {} bytes, limit is {}",
                len, self.max_image_bytes
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DetectError::Fetch(format!("failed to read body: {}", e)))?;
        if bytes.len() > self.max_image_bytes {
            return Err(DetectError::Fetch(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                self.max_image_bytes
            )));
        }

        tracing::debug!(url, bytes = bytes.len(), "Image downloaded");

        tokio::task::spawn_blocking(move || decode_rgb(&bytes))
            .await
            .map_err(|e| DetectError::Fetch(format!("decode task failed: {}", e)))?
    }
}

/// Decode any supported container to packed RGB8.
pub fn decode_rgb(bytes: &[u8]) -> Result<FetchedImage, DetectError> {
    let rgb = image::load_from_memory(bytes)
        .map_err(|e| DetectError::Fetch(format!("failed to decode image: {}", e)))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();

    Ok(FetchedImage {
        pixels: rgb.into_raw(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_rgb_png() {
        let decoded = decode_rgb(&png_bytes(7, 5)).unwrap();

        assert_eq!((decoded.width, decoded.height), (7, 5));
        assert_eq!(decoded.pixels.len(), 7 * 5 * 3);
        // Pixel (3, 2)
        let idx = (2 * 7 + 3) * 3;
        assert_eq!(&decoded.pixels[idx..idx + 3], &[3, 2, 200]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_rgb(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind(), "fetch_failure");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        let fetcher = HttpImageFetcher::new(&FetchConfig {
            timeout_ms: 500,
            max_image_bytes: 1024,
        })
        .unwrap();

        // Port 9 on loopback: discard service, normally closed
        let err = fetcher
            .fetch("http://127.0.0.1:9/image.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::Fetch(_)));
    }
}
