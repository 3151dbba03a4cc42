//! HTTP surface for visual search
//!
//! Design: blocking HTTP microserver (no async runtime). The accept loop only
//! accepts; each connection gets its own thread, which parses the request,
//! routes it, and writes one response before closing. Extraction itself runs
//! on the worker pool inside the service, never on the accept loop.
//!
//! Routes:
//! - `GET /` service banner
//! - `GET /health` liveness plus visual-search status
//! - `POST /api/visual/search` multipart upload (`file`, optional `top_k`)
//! - `OPTIONS *` CORS preflight

pub mod microserver;
pub mod multipart;

pub use microserver::{HttpRequest, HttpResponse};

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::SearchError;
use crate::service::{ServiceStatus, Upload, VisualSearchService};

/// Paths the router knows, for 405 vs 404
const KNOWN_PATHS: &[(&str, &str)] = &[
    ("/", "GET, OPTIONS"),
    ("/health", "GET, OPTIONS"),
    ("/api/visual/search", "POST, OPTIONS"),
];

/// Upper bound on bytes discarded after a response
const DRAIN_LIMIT: u64 = 1024 * 1024;

/// How long to wait for leftover request bytes before closing
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Per-read timeout unless `with_read_timeout` overrides it
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// === Server state ===

/// Server state shared across connection threads
pub struct ServerState {
    service: Arc<VisualSearchService>,
    start_time: Instant,
    version: String,
    max_body_bytes: usize,
    read_timeout: Duration,
}

impl ServerState {
    pub fn new(service: Arc<VisualSearchService>, max_body_bytes: usize) -> Self {
        Self {
            service,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_body_bytes,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Bound each socket read; a client silent for longer is dropped
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn service(&self) -> &VisualSearchService {
        &self.service
    }

    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// === API types ===

#[derive(Serialize)]
struct BannerResponse {
    name: &'static str,
    version: String,
    status: &'static str,
    modules: ModuleStatus,
}

#[derive(Serialize)]
struct ModuleStatus {
    visual_search: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    timestamp: String,
    uptime_secs: u64,
    visual_search: ServiceStatus,
}

// === Helpers ===

/// Add security and CORS headers to response
fn with_security_headers(response: HttpResponse) -> HttpResponse {
    response
        .with_header("X-Content-Type-Options", "nosniff")
        .with_header("Access-Control-Allow-Origin", "*")
}

/// Consistent JSON error response
fn json_error(status: u16, kind: &str, detail: &str) -> HttpResponse {
    HttpResponse::json(
        status,
        &serde_json::json!({"error": kind, "detail": detail}),
    )
}

/// Map a request-boundary error to its HTTP response
fn search_error_response(error: &SearchError) -> HttpResponse {
    match error {
        SearchError::InvalidInput(_) => {
            tracing::info!(error = %error, "rejected upload");
        }
        _ => {
            tracing::error!(error = %error, "visual search failed");
        }
    }
    json_error(error.status(), error.kind(), &error.detail())
}

// === Transport-free handlers ===

/// Route request to handler
pub fn route_request(request: &HttpRequest, state: &ServerState) -> HttpResponse {
    let path = request.path();
    let response = match (request.method.as_str(), path) {
        ("OPTIONS", _) => handle_preflight(),
        ("GET", "/") => handle_banner(state),
        ("GET", "/health") => handle_health(state),
        ("POST", "/api/visual/search") => handle_visual_search(request, state),
        _ => match KNOWN_PATHS.iter().find(|(known, _)| *known == path) {
            Some((_, allow)) => json_error(405, "method_not_allowed", "Method not allowed")
                .with_header("Allow", allow),
            None => json_error(404, "not_found", "Not found"),
        },
    };
    with_security_headers(response)
}

/// Handle OPTIONS (CORS preflight)
fn handle_preflight() -> HttpResponse {
    HttpResponse::empty(204)
        .with_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .with_header("Access-Control-Allow-Headers", "*")
        .with_header("Access-Control-Max-Age", "86400")
}

/// Handle GET /
fn handle_banner(state: &ServerState) -> HttpResponse {
    HttpResponse::json(
        200,
        &BannerResponse {
            name: "shopsight",
            version: state.version.clone(),
            status: "running",
            modules: ModuleStatus {
                visual_search: if state.service.is_ready() {
                    "ready"
                } else {
                    "unavailable"
                },
            },
        },
    )
}

/// Handle GET /health
fn handle_health(state: &ServerState) -> HttpResponse {
    HttpResponse::json(
        200,
        &HealthResponse {
            status: if state.service.is_ready() {
                "healthy"
            } else {
                "degraded"
            },
            version: state.version.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs: state.uptime_secs(),
            visual_search: state.service.status(),
        },
    )
}

/// Handle POST /api/visual/search
fn handle_visual_search(request: &HttpRequest, state: &ServerState) -> HttpResponse {
    if let VisualSearchService::Unavailable { reason } = state.service.as_ref() {
        return search_error_response(&SearchError::ServiceUnavailable(reason.clone()));
    }
    let invalid = |msg: &str| search_error_response(&SearchError::InvalidInput(msg.to_string()));

    let Some(boundary) = request.header("Content-Type").and_then(multipart::boundary) else {
        return invalid("Expected a multipart/form-data upload");
    };
    let parts = match multipart::parse(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(e) => return invalid(&e.to_string()),
    };
    let Some(file) = parts.iter().find(|p| p.name == "file") else {
        return invalid("Missing 'file' field");
    };

    // Query string wins over the form field
    let raw_top_k = request
        .query_param("top_k")
        .or_else(|| parts.iter().find(|p| p.name == "top_k").and_then(|p| p.text()));
    let top_k = match raw_top_k.map(|raw| raw.trim().parse::<usize>()) {
        None => None,
        Some(Ok(k)) => Some(k),
        Some(Err(_)) => return invalid("top_k must be a positive integer"),
    };

    let upload = Upload {
        filename: file.filename.as_deref(),
        content_type: file.content_type.as_deref(),
        bytes: &file.data,
    };

    match state.service.search(upload, top_k) {
        Ok(response) => HttpResponse::json(200, &response),
        Err(e) => search_error_response(&e),
    }
}

// === Transport: microserver accept loop ===

/// Serve one request on a connection
pub fn handle_connection(stream: &mut (impl Read + Write), state: &ServerState) {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", id = %request_id);
    let _guard = span.enter();
    let started = Instant::now();

    let read = {
        let mut reader = BufReader::new(&mut *stream);
        microserver::read_request(&mut reader, state.max_body_bytes)
    };

    let (label, response) = match read {
        Some(Ok(request)) => {
            let label = format!("{} {}", request.method, request.path());
            (label, route_request(&request, state))
        }
        Some(Err(e)) => {
            tracing::info!(error = %e.message(), "unreadable request");
            let kind = if e.status() == 413 {
                "payload_too_large"
            } else {
                "bad_request"
            };
            (
                "-".to_string(),
                with_security_headers(json_error(e.status(), kind, &e.message())),
            )
        }
        None => return,
    };

    let response = response.with_header("X-Request-Id", &request_id.to_string());
    microserver::write_response(stream, &response);

    tracing::info!(
        request = %label,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
}

/// Discard request bytes left unread (e.g. an oversized body) so closing the
/// socket does not reset the connection before the client reads the response
fn drain_unread(stream: &mut TcpStream) {
    let _ = stream.set_read_timeout(Some(DRAIN_TIMEOUT));
    let _ = std::io::copy(&mut stream.take(DRAIN_LIMIT), &mut std::io::sink());
}

/// Bind the listening socket
pub fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr).with_context(|| format!("Failed to bind {}", addr))
}

/// Accept connections forever, one thread per connection
pub fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                if let Err(e) = stream.set_read_timeout(Some(state.read_timeout)) {
                    tracing::warn!(error = %e, "failed to set read timeout");
                }
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    handle_connection(&mut stream, &state);
                    let _ = stream.shutdown(Shutdown::Write);
                    drain_unread(&mut stream);
                });
            }
            Err(e) => tracing::warn!(error = %e, "TCP accept error"),
        }
    }
    Ok(())
}
