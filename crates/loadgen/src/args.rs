use clap::Parser;

/// Load generator for the detection service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Detection endpoint
    #[arg(long, default_value = "http://localhost:3000/detect", value_name = "URL")]
    pub url: String,

    /// Image every request asks the service to fetch
    #[arg(
        long,
        default_value = "https://live.staticflickr.com/7169/6396112547_9674218be1_b_d.jpg",
        value_name = "URL"
    )]
    pub image_url: String,

    /// Maximum requests in flight
    #[arg(long, default_value = "100", value_name = "N")]
    pub concurrency: usize,

    /// Warm-up requests, excluded from statistics
    #[arg(long, default_value = "1500", value_name = "COUNT")]
    pub warmup: usize,

    /// Measured requests
    #[arg(long, default_value = "4500", value_name = "COUNT")]
    pub requests: usize,

    /// Per-request client timeout
    #[arg(long, default_value = "600", value_name = "SECONDS")]
    pub timeout_secs: u64,

    /// Bins per text histogram
    #[arg(long, default_value = "20", value_name = "BINS")]
    pub histogram_bins: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["loadgen"]);
        assert_eq!(args.concurrency, 100);
        assert_eq!(args.warmup, 1500);
        assert_eq!(args.requests, 4500);
        assert_eq!(args.timeout_secs, 600);
        assert_eq!(args.histogram_bins, 20);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "loadgen",
            "--url",
            "http://10.0.0.5:3000/detect",
            "--concurrency",
            "8",
            "--warmup",
            "0",
        ]);
        assert_eq!(args.url, "http://10.0.0.5:3000/detect");
        assert_eq!(args.concurrency, 8);
        assert_eq!(args.warmup, 0);
    }
}
