use std::io;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::infrastructure::bootstrap;
use crate::infrastructure::config::AppConfig;
use crate::interfaces::http::start_server;

fn to_io_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

pub async fn run() -> io::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(to_io_error)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let state = bootstrap::setup(&config).await.map_err(|err| {
        error!(error = %err, "Failed to initialize service");
        to_io_error(err)
    })?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting HTTP server"
    );
    start_server(state, &config.server.host, config.server.port)?.await
}
