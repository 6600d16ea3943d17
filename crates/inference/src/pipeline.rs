use crate::{
    batching::BatchingRunner,
    config::InferenceConfig,
    error::DetectError,
    fetch::{FetchedImage, ImageFetcher},
    processing::{AnchorDecoder, NonMaxSuppressor},
    stopwatch::StopWatch,
};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use preprocess::{CpuPreProcessor, Preprocess, PreprocessResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Successful detection: `[x1, y1, x2, y2, score, class_id]` rows in
/// original-image pixels, plus per-stage timings in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct DetectResponse {
    pub bboxes: Vec<[f32; 6]>,
    pub timings: BTreeMap<String, f64>,
}

struct PipelineMetrics {
    requests: Counter<u64>,
    failures: Counter<u64>,
    duration: Histogram<f64>,
}

fn init_metrics(meter_name: &'static str) -> PipelineMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
    ];
    PipelineMetrics {
        requests: meter
            .u64_counter("detect_requests_total")
            .with_description("Detection requests received")
            .build(),
        failures: meter
            .u64_counter("detect_failures_total")
            .with_description("Detection requests that ended in an error")
            .build(),
        duration: meter
            .f64_histogram("detect_duration_seconds")
            .with_description("End-to-end time of a detection request")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
    }
}

/// Request path: fetch → letterbox → batched compute → decode + NMS.
pub struct DetectionPipeline<F: ImageFetcher> {
    fetcher: F,
    runner: BatchingRunner,
    decoder: AnchorDecoder,
    suppressor: NonMaxSuppressor,
    input_size: u32,
    admission_timeout: Duration,
    metrics: PipelineMetrics,
}

impl<F: ImageFetcher> DetectionPipeline<F> {
    pub fn new(fetcher: F, runner: BatchingRunner, config: &InferenceConfig) -> Self {
        Self {
            fetcher,
            runner,
            decoder: AnchorDecoder::new(&config.decode, config.input_size),
            suppressor: NonMaxSuppressor::new(config.nms.iou_threshold, config.suppression_mode()),
            input_size: config.input_size,
            admission_timeout: config.admission_timeout(),
            metrics: init_metrics("detect"),
        }
    }

    pub fn runner(&self) -> &BatchingRunner {
        &self.runner
    }

    /// Run one detection request end to end.
    pub async fn detect(&self, url: &str) -> Result<DetectResponse, DetectError> {
        let span = tracing::info_span!("detect", url = %url);
        let started = Instant::now();
        self.metrics.requests.add(1, &[]);

        let result = self.run(url).instrument(span).await;

        self.metrics
            .duration
            .record(started.elapsed().as_secs_f64(), &[]);
        match &result {
            Ok(response) => tracing::debug!(
                url,
                detections = response.bboxes.len(),
                "Detection complete"
            ),
            Err(e) => {
                self.metrics
                    .failures
                    .add(1, &[KeyValue::new("kind", e.kind())]);
                tracing::warn!(url, kind = e.kind(), error = %e, "Detection failed");
            }
        }
        result
    }

    async fn run(&self, url: &str) -> Result<DetectResponse, DetectError> {
        let mut sw = StopWatch::new();

        sw.start_stop("fetch_image");
        let image = self.fetcher.fetch(url).await?;
        sw.start_stop("fetch_image");

        sw.start_stop("preprocess");
        let PreprocessResult { tensor, transform } = self.preprocess(image).await?;
        sw.start_stop("preprocess");

        sw.start_stop("compute");
        let output = tokio::time::timeout(self.admission_timeout, self.runner.submit(tensor))
            .await
            .map_err(|_| DetectError::AdmissionTimeout(self.admission_timeout))??;
        sw.start_stop("compute");

        sw.start_stop("postprocess");
        let candidates = self.decoder.decode(&output.scales, &transform)?;
        let detections = self.suppressor.suppress(&candidates);
        let bboxes = detections.iter().map(|d| d.to_row()).collect();
        sw.start_stop("postprocess");
        tracing::debug!(timings = ?sw.timings(), "Stage timings");

        Ok(DetectResponse {
            bboxes,
            timings: sw.into_timings(),
        })
    }

    /// Letterbox on the blocking pool; resizing a large photo is CPU-bound.
    async fn preprocess(&self, image: FetchedImage) -> Result<PreprocessResult, DetectError> {
        let size = self.input_size;
        let result = tokio::task::spawn_blocking(move || {
            CpuPreProcessor::new((size, size)).preprocess(&image.pixels, image.width, image.height)
        })
        .await
        .map_err(|e| DetectError::Preprocess(format!("preprocess task failed: {}", e)))?;

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InferenceBackend, InferenceOutput};
    use crate::batching::RunnerConfig;
    use ndarray::{Array, IxDyn};

    const INPUT: u32 = 64;

    struct StaticFetcher(FetchedImage);

    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedImage, DetectError> {
            if url.contains("missing") {
                return Err(DetectError::Fetch(format!("404 for {}", url)));
            }
            Ok(self.0.clone())
        }
    }

    /// All-background predictions: every logit strongly negative.
    struct QuietBackend {
        grids: Vec<usize>,
    }

    impl InferenceBackend for QuietBackend {
        fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            let n = images.shape()[0];
            Ok(InferenceOutput::new(
                self.grids
                    .iter()
                    .map(|&g| Array::from_elem(IxDyn(&[n, g, g, 3, 7]), -20.0))
                    .collect(),
            ))
        }
    }

    /// Stalls on its first batch only, then answers like `QuietBackend`.
    struct StallFirstBackend {
        stall: Duration,
        calls: usize,
        quiet: QuietBackend,
    }

    impl InferenceBackend for StallFirstBackend {
        fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            if self.calls == 0 {
                std::thread::sleep(self.stall);
            }
            self.calls += 1;
            self.quiet.infer(images)
        }
    }

    fn config() -> InferenceConfig {
        let mut config = InferenceConfig::test_default();
        config.input_size = INPUT;
        config.batch.batch_wait_window_ms = 1;
        config
    }

    fn pipeline(fetcher: StaticFetcher) -> DetectionPipeline<StaticFetcher> {
        let config = config();
        let runner = BatchingRunner::spawn(
            QuietBackend { grids: vec![8, 4, 2] },
            RunnerConfig::from(&config),
        );
        DetectionPipeline::new(fetcher, runner, &config)
    }

    fn gray_image(width: u32, height: u32) -> FetchedImage {
        FetchedImage {
            pixels: vec![90; (width * height * 3) as usize],
            width,
            height,
        }
    }

    #[tokio::test]
    async fn test_detect_reports_every_stage() {
        let pipeline = pipeline(StaticFetcher(gray_image(40, 30)));

        let response = pipeline.detect("http://img/ok.jpg").await.unwrap();

        assert!(response.bboxes.is_empty());
        let stages: Vec<&str> = response.timings.keys().map(String::as_str).collect();
        assert_eq!(stages, vec!["compute", "fetch_image", "postprocess", "preprocess"]);
        assert!(response.timings.values().all(|ms| *ms >= 0.0));
    }

    #[tokio::test]
    async fn test_fetch_failure_short_circuits() {
        let pipeline = pipeline(StaticFetcher(gray_image(40, 30)));

        let err = pipeline.detect("http://img/missing.jpg").await.unwrap_err();

        assert_eq!(err.kind(), "fetch_failure");
        assert_eq!(pipeline.runner().stats().items_dispatched, 0);
    }

    #[tokio::test]
    async fn test_corrupt_pixels_are_shape_mismatch() {
        let mut image = gray_image(40, 30);
        image.pixels.truncate(100);
        let pipeline = pipeline(StaticFetcher(image));

        let err = pipeline.detect("http://img/bad.raw").await.unwrap_err();

        assert!(matches!(err, DetectError::ShapeMismatch(_)));
    }

    #[tokio::test]
    async fn test_slow_executor_is_admission_timeout() {
        let mut config = config();
        config.batch.executor_timeout_ms = 100;
        let runner = BatchingRunner::spawn(
            StallFirstBackend {
                stall: Duration::from_millis(1_000),
                calls: 0,
                quiet: QuietBackend { grids: vec![8, 4, 2] },
            },
            RunnerConfig::from(&config),
        );
        let pipeline = DetectionPipeline::new(StaticFetcher(gray_image(40, 30)), runner, &config);

        let err = pipeline.detect("http://img/first.jpg").await.unwrap_err();
        assert_eq!(err, DetectError::AdmissionTimeout(Duration::from_millis(101)));
        assert_eq!(err.kind(), "admission_timeout");

        // The stalled batch still finishes; the next request gets its own batch
        while pipeline.runner().stats().batches_dispatched < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let response = pipeline.detect("http://img/second.jpg").await.unwrap();
        assert!(response.bboxes.is_empty());
        assert_eq!(pipeline.runner().stats().batches_dispatched, 2);
    }

    #[test]
    fn test_response_serializes_to_wire_shape() {
        let mut timings = BTreeMap::new();
        timings.insert("compute".to_string(), 1.5);
        let response = DetectResponse {
            bboxes: vec![[1.0, 2.0, 3.0, 4.0, 0.5, 2.0]],
            timings,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["bboxes"][0][5], 2.0);
        assert_eq!(json["timings"]["compute"], 1.5);
    }
}
