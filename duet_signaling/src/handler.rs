//! HTTP long-polling handlers for the signaling relay
//!
//! This module implements long-polling based signaling that works over
//! plain HTTP without WebSocket upgrades or long-lived connections.

use crate::config::ConfigError;
use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientEvent, ConnectionHandle, ServerEvent};
use crate::state::ServerState;
use serde::Serialize;
use tracing::{debug, warn};
use wstd::http::{Body, HeaderName, HeaderValue, Method, Request, Response, StatusCode};

/// Header carrying the sender's connection handle
pub const HANDLE_HEADER: &str = "x-connection-handle";

const INFO_PAGE: &str = "Duet Signaling Relay (Long-Polling)\n\
                         \n\
                         Endpoints:\n\
                         - GET /health - Health check\n\
                         - GET /poll?handle={id} - Open a connection or poll its events\n\
                         - POST /signal - Send one event (x-connection-handle header required)\n\
                         - POST /disconnect - Close a connection (x-connection-handle header required)\n\
                         \n\
                         Protocol:\n\
                         1. GET /poll to get a handle and the handle-assigned event\n\
                         2. POST /signal {\"event\":\"join-room\",\"payload\":{\"identity\":...,\"room\":...}}\n\
                         3. Keep polling GET /poll?handle={id} for peer-joined, call-offer, ...\n\
                         \n\
                         Response format: {\"handle\": \"uuid\", \"events\": [...]}\n";

#[derive(Serialize)]
struct PollResponse {
    handle: ConnectionHandle,
    events: Vec<ServerEvent>,
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// Normalize a request path: no trailing slash, "/" stays "/"
fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn parse_handle(value: Option<&str>) -> Result<ConnectionHandle, ClientRequestError> {
    value
        .and_then(|s| s.trim().parse().ok())
        .ok_or(ClientRequestError::MissingHandle)
}

fn header_handle(request: &Request<Body>) -> Result<ConnectionHandle, ClientRequestError> {
    parse_handle(
        request
            .headers()
            .get(HANDLE_HEADER)
            .and_then(|v| v.to_str().ok()),
    )
}

fn respond(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static(content_type),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    response
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    respond(status, "text/plain", Body::from(body.into()))
}

fn status_for_request_error(error: &ClientRequestError) -> StatusCode {
    match error {
        ClientRequestError::MissingHandle
        | ClientRequestError::Json(_)
        | ClientRequestError::Body(_) => StatusCode::BAD_REQUEST,
    }
}

fn status_for_signaling_error(error: &SignalingError) -> StatusCode {
    match error {
        SignalingError::UnknownConnection(_) => StatusCode::GONE,
        SignalingError::Json(_) | SignalingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Response for every request while the server cannot start
pub fn config_error_response(error: &ConfigError) -> Response<Body> {
    text(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

/// Open a connection or drain the events of an existing one
fn handle_poll(query: Option<&str>, state: &ServerState) -> Response<Body> {
    let requested = parse_handle(get_query_param(query, "handle")).ok();
    let (handle, events) = state.poll_or_connect(requested);

    match serde_json::to_string(&PollResponse { handle, events }) {
        Ok(json) => respond(StatusCode::OK, "application/json", Body::from(json)),
        Err(e) => {
            warn!(%handle, error = %e, "failed to encode poll response");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode events")
        }
    }
}

async fn read_event(request: Request<Body>) -> Result<ClientEvent, ClientRequestError> {
    let mut body = request.into_body();
    let body_str = body
        .str_contents()
        .await
        .map_err(|e| ClientRequestError::Body(format!("{:?}", e)))?;
    Ok(body_str.parse()?)
}

/// Handle a signal POST request
async fn handle_signal(request: Request<Body>, state: &ServerState) -> Response<Body> {
    let sender = match header_handle(&request) {
        Ok(handle) => handle,
        Err(e) => return text(status_for_request_error(&e), e.to_string()),
    };

    let event = match read_event(request).await {
        Ok(event) => event,
        Err(e) => {
            debug!(%sender, error = %e, "rejecting malformed signal");
            return text(status_for_request_error(&e), format!("Invalid request: {}", e));
        }
    };

    match state.dispatch(sender, event) {
        Ok(()) => text(StatusCode::OK, "OK"),
        Err(e) => text(status_for_signaling_error(&e), e.to_string()),
    }
}

fn handle_disconnect(request: &Request<Body>, state: &ServerState) -> Response<Body> {
    match header_handle(request) {
        Ok(handle) => {
            state.disconnect(handle);
            text(StatusCode::OK, "OK")
        }
        Err(e) => text(status_for_request_error(&e), e.to_string()),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight() -> Response<Body> {
    let mut response = respond(StatusCode::NO_CONTENT, "text/plain", Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("content-type, x-connection-handle"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("86400"),
    );
    response
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = normalize_path(uri.path());

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(handle_cors_preflight());
    }

    if method == Method::GET {
        return Ok(match path {
            "/health" => text(StatusCode::OK, "OK"),
            "/poll" => handle_poll(uri.query(), state),
            "/" => text(StatusCode::OK, INFO_PAGE),
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        });
    }

    if method == Method::POST {
        return Ok(match path {
            "/signal" => handle_signal(request, state).await,
            "/disconnect" => handle_disconnect(&request, state),
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        });
    }

    Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"))
}
