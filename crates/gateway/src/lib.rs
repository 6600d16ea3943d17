pub mod error;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{DetectRequest, router, run_server, shutdown_signal};
pub use state::AppState;
