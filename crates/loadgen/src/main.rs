use clap::Parser;
use common::{Environment, LogLevel, setup_logging};
use loadgen::{Args, LoadClient, Report};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(LogLevel::Info, Environment::from_env());

    let client = LoadClient::new(
        &args.url,
        &args.image_url,
        Duration::from_secs(args.timeout_secs),
    )?;

    if args.warmup > 0 {
        let warmup = client.run_phase("warmup", args.warmup, args.concurrency).await;
        tracing::info!(samples = warmup.len(), "Warm-up done");
    }

    let started = Instant::now();
    let samples = client
        .run_phase("benchmark", args.requests, args.concurrency)
        .await;
    let report = Report::new(started.elapsed(), samples);

    print!("{}", report.render(args.histogram_bins));
    Ok(())
}
