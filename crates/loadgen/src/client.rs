use crate::sample::Sample;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Issues `/detect` calls. Clones share one connection pool.
#[derive(Clone)]
pub struct LoadClient {
    client: reqwest::Client,
    url: String,
    body: serde_json::Value,
}

impl LoadClient {
    pub fn new(url: &str, image_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            body: json!({ "image_url": image_url }),
        })
    }

    pub async fn send_one(&self) -> Sample {
        let started = Instant::now();
        let response = match self.client.post(&self.url).json(&self.body).send().await {
            Ok(response) => response,
            Err(e) => return classify(e),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => Sample::from_response(status, started.elapsed(), &body),
            Err(e) => classify(e),
        }
    }

    /// Send `count` requests with at most `concurrency` in flight. Samples are
    /// returned in completion order.
    pub async fn run_phase(
        &self,
        phase: &str,
        count: usize,
        concurrency: usize,
    ) -> Vec<Sample> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let progress = progress_bar(phase, count);

        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let client = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                // Semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                client.send_one().await
            });
        }

        let mut samples = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sample) => samples.push(sample),
                Err(e) => samples.push(Sample::Network {
                    message: format!("request task failed: {}", e),
                }),
            }
            progress.inc(1);
        }
        progress.finish();

        samples
    }
}

fn classify(e: reqwest::Error) -> Sample {
    if e.is_timeout() {
        Sample::Timeout
    } else {
        tracing::debug!(error = %e, "Request failed");
        Sample::Network {
            message: e.to_string(),
        }
    }
}

fn progress_bar(phase: &str, count: usize) -> ProgressBar {
    let pb = ProgressBar::new(count as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{prefix:>9} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(phase.to_string());
    pb
}
