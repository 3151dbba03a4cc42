//! `shopsight serve` - run the HTTP server
//!
//! Startup never fails because of missing assets: the server comes up and
//! reports the visual-search module as unavailable. Only a bind failure is
//! fatal.

use anyhow::Result;
use std::sync::Arc;

use shopsight::config::Config;
use shopsight::server::{self, ServerState};
use shopsight::service::VisualSearchService;

pub fn execute(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let service = Arc::new(VisualSearchService::initialize(&config));
    let status = service.status();

    let listener = server::bind(&config.server.host, config.server.port)?;
    let state = Arc::new(
        ServerState::new(service, config.server.max_body_bytes)
            .with_read_timeout(config.server.read_timeout()),
    );

    if config.server.host != "127.0.0.1" && config.server.host != "localhost" {
        eprintln!(
            "WARNING: Binding to {} exposes the server to the network.",
            config.server.host
        );
        eprintln!("  The server has no encryption (HTTP only). Use a reverse proxy for production.");
    }

    println!("🚀 shopsight starting...");
    println!(
        "   Listening on http://{}:{}",
        config.server.host, config.server.port
    );
    match (status.products, status.reason.as_deref()) {
        (Some(products), _) => println!("   Visual search: ready ({} products)", products),
        (None, Some(reason)) => println!("   Visual search: unavailable ({})", reason),
        (None, None) => println!("   Visual search: unavailable"),
    }
    println!("   Press Ctrl+C to stop\n");

    server::serve(listener, state)
}
