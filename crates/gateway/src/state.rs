use inference::{DetectionPipeline, ImageFetcher};
use std::sync::Arc;

pub struct AppState<F: ImageFetcher> {
    pub pipeline: Arc<DetectionPipeline<F>>,
}

impl<F: ImageFetcher> AppState<F> {
    pub fn new(pipeline: DetectionPipeline<F>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

// Manual impl: the fetcher itself need not be `Clone`
impl<F: ImageFetcher> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}
