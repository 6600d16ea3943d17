pub mod args;
pub mod client;
pub mod report;
pub mod sample;
pub mod stats;

pub use args::Args;
pub use client::LoadClient;
pub use report::Report;
pub use sample::Sample;
