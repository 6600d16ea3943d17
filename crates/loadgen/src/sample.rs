use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// 200 with the server's per-stage timings (milliseconds)
    Success {
        status: u16,
        elapsed: Duration,
        timings: BTreeMap<String, f64>,
    },
    HttpError {
        status: u16,
        elapsed: Duration,
    },
    /// Connection refused, reset, TLS failure, unreadable body...
    Network {
        message: String,
    },
    Timeout,
}

/// The part of a `/detect` success body the report needs.
#[derive(Debug, Deserialize)]
struct DetectBody {
    #[serde(default)]
    timings: BTreeMap<String, f64>,
}

impl Sample {
    /// Build a sample from a finished HTTP exchange.
    pub fn from_response(status: u16, elapsed: Duration, body: &[u8]) -> Self {
        if status != 200 {
            return Sample::HttpError { status, elapsed };
        }

        let timings = match serde_json::from_slice::<DetectBody>(body) {
            Ok(parsed) => parsed.timings,
            Err(e) => {
                tracing::warn!(error = %e, "Success body without readable timings");
                BTreeMap::new()
            }
        };
        Sample::Success {
            status,
            elapsed,
            timings,
        }
    }

    /// Key for the status distribution table.
    pub fn status_label(&self) -> String {
        match self {
            Sample::Success { status, .. } | Sample::HttpError { status, .. } => status.to_string(),
            Sample::Network { .. } => "network".to_string(),
            Sample::Timeout => "timeout".to_string(),
        }
    }

    /// Client-observed latency, when the server answered at all.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Sample::Success { elapsed, .. } | Sample::HttpError { elapsed, .. } => Some(*elapsed),
            Sample::Network { .. } | Sample::Timeout => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_parses_timings() {
        let body = br#"{"bboxes": [], "timings": {"compute": 12.5, "fetch_image": 3.0}}"#;
        let sample = Sample::from_response(200, Duration::from_millis(20), body);

        match sample {
            Sample::Success { timings, .. } => {
                assert_eq!(timings.len(), 2);
                assert_eq!(timings["compute"], 12.5);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_non_200_is_http_error() {
        let sample = Sample::from_response(503, Duration::from_millis(4), b"{}");
        assert_eq!(
            sample,
            Sample::HttpError {
                status: 503,
                elapsed: Duration::from_millis(4)
            }
        );
        assert_eq!(sample.status_label(), "503");
    }

    #[test]
    fn test_unreadable_success_body_keeps_status() {
        let sample = Sample::from_response(200, Duration::from_millis(1), b"<html>");
        assert_eq!(sample.status_label(), "200");
        assert!(matches!(sample, Sample::Success { ref timings, .. } if timings.is_empty()));
    }

    #[test]
    fn test_failures_have_no_latency() {
        assert_eq!(Sample::Timeout.elapsed(), None);
        assert_eq!(Sample::Timeout.status_label(), "timeout");
        let net = Sample::Network {
            message: "connection refused".to_string(),
        };
        assert_eq!(net.status_label(), "network");
        assert_eq!(net.elapsed(), None);
    }
}
