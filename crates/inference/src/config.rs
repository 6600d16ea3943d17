use crate::processing::nms::SuppressionMode;
use serde::Deserialize;
use std::time::Duration;

pub use common::{Environment, LogLevel};

/// YOLOv4 anchor priors in input pixels, 3 per scale (small, medium, large objects).
pub const DEFAULT_ANCHORS: [[[f32; 2]; 3]; 3] = [
    [[12.0, 16.0], [19.0, 36.0], [40.0, 28.0]],
    [[36.0, 75.0], [76.0, 55.0], [72.0, 146.0]],
    [[142.0, 110.0], [192.0, 243.0], [459.0, 401.0]],
];
pub const DEFAULT_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
pub const DEFAULT_XYSCALE: [f32; 3] = [1.2, 1.1, 1.05];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub otel_endpoint: Option<String>,
    pub bind_addr: String,
    pub model_path: String,
    pub use_cuda: bool,
    /// Side of the square network input
    pub input_size: u32,
    pub batch: BatchConfig,
    pub decode: DecodeConfig,
    pub nms: NmsConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub batch_wait_window_ms: u64,
    /// Upper bound on one executor call, added to the wait window to form the
    /// per-request admission deadline
    pub executor_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub anchors: Vec<Vec<[f32; 2]>>,
    pub strides: Vec<f32>,
    pub xyscale: Vec<f32>,
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NmsMode {
    Nms,
    SoftNms,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NmsConfig {
    pub iou_threshold: f32,
    pub mode: NmsMode,
    /// Gaussian width for soft-NMS decay
    pub sigma: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub max_image_bytes: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: LogLevel::Info,
            otel_endpoint: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            model_path: "/models/yolov4.onnx".to_string(),
            use_cuda: true,
            input_size: 416,
            batch: BatchConfig::default(),
            decode: DecodeConfig::default(),
            nms: NmsConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            batch_wait_window_ms: 10,
            executor_timeout_ms: 5_000,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            anchors: DEFAULT_ANCHORS.iter().map(|scale| scale.to_vec()).collect(),
            strides: DEFAULT_STRIDES.to_vec(),
            xyscale: DEFAULT_XYSCALE.to_vec(),
            score_threshold: 0.25,
        }
    }
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.213,
            mode: NmsMode::Nms,
            sigma: 0.3,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

impl InferenceConfig {
    /// Load configuration from `DETECT_`-prefixed environment variables on top
    /// of the built-in defaults. Nested keys use `__`, e.g.
    /// `DETECT_BATCH__MAX_BATCH_SIZE=16`.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = ::config::Config::builder()
            .set_default("log_level", "info")?
            .set_default("environment", "development")?
            .add_source(
                ::config::Environment::with_prefix("DETECT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the decoder, NMS or runner cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let decode = &self.decode;
        anyhow::ensure!(self.batch.max_batch_size > 0, "max_batch_size must be > 0");
        anyhow::ensure!(
            !decode.strides.is_empty()
                && decode.anchors.len() == decode.strides.len()
                && decode.xyscale.len() == decode.strides.len(),
            "anchors ({}), strides ({}) and xyscale ({}) must describe the same number of scales",
            decode.anchors.len(),
            decode.strides.len(),
            decode.xyscale.len()
        );
        anyhow::ensure!(
            decode.anchors.iter().all(|scale| !scale.is_empty()),
            "every scale needs at least one anchor"
        );
        anyhow::ensure!(
            decode.strides.iter().all(|&s| s >= 1.0 && self.input_size % s as u32 == 0),
            "input_size {} must be divisible by every stride {:?}",
            self.input_size,
            decode.strides
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&decode.score_threshold),
            "score_threshold must be in [0, 1)"
        );
        anyhow::ensure!(
            self.nms.iou_threshold > 0.0 && self.nms.iou_threshold <= 1.0,
            "iou_threshold must be in (0, 1]"
        );
        anyhow::ensure!(self.nms.sigma > 0.0, "soft-NMS sigma must be > 0");
        Ok(())
    }

    pub fn batch_wait_window(&self) -> Duration {
        Duration::from_millis(self.batch.batch_wait_window_ms)
    }

    /// Longest a request may spend between submission and a resolved batch.
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.batch.batch_wait_window_ms + self.batch.executor_timeout_ms)
    }

    pub fn suppression_mode(&self) -> SuppressionMode {
        match self.nms.mode {
            NmsMode::Nms => SuppressionMode::Nms,
            NmsMode::SoftNms => SuppressionMode::SoftNms {
                sigma: self.nms.sigma,
            },
        }
    }

    /// Per-item tensor shape the runner accepts: `[H, W, 3]`.
    pub fn item_shape(&self) -> Vec<usize> {
        vec![self.input_size as usize, self.input_size as usize, 3]
    }

    /// Create default configuration for testing
    pub fn test_default() -> Self {
        Self {
            use_cuda: false,
            model_path: "/models/test.onnx".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_yolov4_deployment() {
        let config = InferenceConfig::default();
        assert_eq!(config.input_size, 416);
        assert_eq!(config.decode.strides, vec![8.0, 16.0, 32.0]);
        assert_eq!(config.decode.anchors[2][2], [459.0, 401.0]);
        assert_eq!(config.decode.score_threshold, 0.25);
        assert_eq!(config.nms.iou_threshold, 0.213);
        assert_eq!(config.suppression_mode(), SuppressionMode::Nms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = InferenceConfig::test_default();
        config.batch.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_scale_count_mismatch() {
        let mut config = InferenceConfig::test_default();
        config.decode.xyscale.pop();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("same number of scales"));
    }

    #[test]
    fn test_validate_rejects_indivisible_input_size() {
        let mut config = InferenceConfig::test_default();
        config.input_size = 420;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_admission_timeout_adds_window_and_executor_bound() {
        let mut config = InferenceConfig::test_default();
        config.batch.batch_wait_window_ms = 20;
        config.batch.executor_timeout_ms = 980;
        assert_eq!(config.admission_timeout(), Duration::from_secs(1));
        assert_eq!(config.batch_wait_window(), Duration::from_millis(20));
    }

    #[test]
    fn test_soft_nms_mode_carries_sigma() {
        let mut config = InferenceConfig::test_default();
        config.nms.mode = NmsMode::SoftNms;
        config.nms.sigma = 0.5;
        assert_eq!(
            config.suppression_mode(),
            SuppressionMode::SoftNms { sigma: 0.5 }
        );
    }
}
