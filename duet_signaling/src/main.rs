//! WASI HTTP server entry point for the long-polling signaling relay
//!
//! This module provides the main entry point when running as a WASI HTTP component
//! using `wasmtime serve`.

use duet_signaling::config::{ConfigError, DEFAULT_LOG_FILTER};
use duet_signaling::handler::config_error_response;
use duet_signaling::{Config, ServerState, handle_request};
use std::cell::RefCell;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wstd::http::{Body, Request, Response};

// Thread-local state for the server (WASI is single-threaded)
thread_local! {
    static STATE: RefCell<Option<Result<ServerState, ConfigError>>> = const { RefCell::new(None) };
}

fn init_tracing() {
    // A component may be instantiated per request; a second init is harmless.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn init_state() -> Result<ServerState, ConfigError> {
    init_tracing();
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    info!(?config, "signaling relay ready");
    Ok(ServerState::new(&config))
}

fn get_or_init_state() -> Result<ServerState, ConfigError> {
    STATE.with(|s| s.borrow_mut().get_or_insert_with(init_state).clone())
}

/// The main HTTP handler for WASI
///
/// This function is called by the WASI runtime for each incoming HTTP request.
/// Every request fails with 500 while the configuration is invalid.
#[wstd::http_server]
async fn main(request: Request<Body>) -> Result<Response<Body>, wstd::http::Error> {
    match get_or_init_state() {
        Ok(state) => handle_request(request, &state).await,
        Err(e) => Ok(config_error_response(&e)),
    }
}
