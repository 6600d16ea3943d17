use preprocess::PreprocessError;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single detection request.
///
/// `Clone` because one executor failure is delivered to every slot of the
/// batch it happened in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Preprocessing failed: {0}")]
    Preprocess(String),

    #[error("Batch dispatch failed: {0}")]
    BatchDispatch(String),

    #[error("Request did not complete within {0:?}")]
    AdmissionTimeout(Duration),

    #[error("Batching runner is shut down")]
    RunnerClosed,
}

impl DetectError {
    /// Stable label for logs, metric attributes and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::Fetch(_) => "fetch_failure",
            DetectError::ShapeMismatch(_) => "shape_mismatch",
            DetectError::Preprocess(_) => "preprocess_failure",
            DetectError::BatchDispatch(_) => "batch_dispatch_failure",
            DetectError::AdmissionTimeout(_) => "admission_timeout",
            DetectError::RunnerClosed => "runner_closed",
        }
    }
}

impl From<PreprocessError> for DetectError {
    fn from(e: PreprocessError) -> Self {
        match e {
            PreprocessError::SizeMismatch { .. } | PreprocessError::Shape(_) => {
                DetectError::ShapeMismatch(e.to_string())
            }
            _ => DetectError::Preprocess(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = DetectError::Fetch("connection refused".to_string());
        assert_eq!(err.to_string(), "Failed to fetch image: connection refused");

        let err = DetectError::BatchDispatch("CUDA out of memory".to_string());
        assert_eq!(err.to_string(), "Batch dispatch failed: CUDA out of memory");

        let err = DetectError::AdmissionTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Request did not complete within 250ms");

        assert_eq!(
            DetectError::RunnerClosed.to_string(),
            "Batching runner is shut down"
        );
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let errors = [
            DetectError::Fetch(String::new()),
            DetectError::ShapeMismatch(String::new()),
            DetectError::Preprocess(String::new()),
            DetectError::BatchDispatch(String::new()),
            DetectError::AdmissionTimeout(Duration::ZERO),
            DetectError::RunnerClosed,
        ];
        let mut kinds: Vec<_> = errors.iter().map(DetectError::kind).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_conversion_from_preprocess_error() {
        let err: DetectError = PreprocessError::SizeMismatch {
            expected: 12,
            actual: 10,
        }
        .into();
        assert!(matches!(err, DetectError::ShapeMismatch(_)));

        let err: DetectError = PreprocessError::EmptyImage {
            width: 0,
            height: 0,
        }
        .into();
        assert_eq!(err.kind(), "preprocess_failure");
    }
}
