pub mod backend;
pub mod batching;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod processing;
pub mod stopwatch;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, InferenceOutput};
pub use batching::{BatchingRunner, RunnerConfig, RunnerStats};
pub use config::InferenceConfig;
pub use error::DetectError;
pub use fetch::{FetchedImage, HttpImageFetcher, ImageFetcher};
pub use pipeline::{DetectResponse, DetectionPipeline};
pub use processing::{AnchorDecoder, Detection, NonMaxSuppressor, SuppressionMode};
pub use stopwatch::StopWatch;
