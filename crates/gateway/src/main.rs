use common::TelemetryGuard;
use gateway::{AppState, run_server, shutdown_signal};
use inference::{
    BatchingRunner, DetectionPipeline, HttpImageFetcher, InferenceConfig, RunnerConfig,
    backend::ort::{ExecutionProvider, OrtBackend},
    logging::setup_logging,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = InferenceConfig::from_env()?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init(
            "detect-gateway",
            endpoint,
            config.log_level,
            config.environment,
        )?),
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(
        environment = config.environment.as_str(),
        model_path = %config.model_path,
        bind_addr = %config.bind_addr,
        "Detection gateway starting"
    );

    let backend = OrtBackend::new(
        &config.model_path,
        ExecutionProvider::from_use_cuda(config.use_cuda),
    )?;

    let runner = BatchingRunner::spawn(backend, RunnerConfig::from(&config));
    let fetcher = HttpImageFetcher::new(&config.fetch)?;
    let pipeline = DetectionPipeline::new(fetcher, runner.clone(), &config);

    let served = run_server(&config.bind_addr, AppState::new(pipeline), shutdown_signal()).await;

    // Listener is closed; dispatch whatever is still queued before exiting
    runner.shutdown().await;
    tracing::info!("Detection gateway stopped");

    served
}
