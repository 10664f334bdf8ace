#![cfg(not(tarpaulin_include))]

use farmbook::{Config, app};

/// Main entry point for the web application
///
/// Reads settings from the environment (see [`Config::from_env`]) and serves until stopped.
/// Log verbosity follows `RUST_LOG`, defaulting to `info`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    app::run(config).await
}
