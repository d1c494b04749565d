mod routes;
mod worker;

pub mod app;
pub mod config;
pub mod jobs;
pub mod processor;
pub mod server;
pub mod telemetry;

pub use app::start_app;
pub use server::{build_router, SharedState};
