//! Scribe relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve the default "quill" text on localhost:8000
//! scribe-server
//!
//! # Listen on all interfaces with verbose logging
//! scribe-server --bind 0.0.0.0:8000 --log-level debug
//! ```

use clap::Parser;
use log::info;
use scribe_collab::server::{ServerConfig, SyncServer};

/// Collaborative rich-text relay server
#[derive(Parser, Debug)]
#[command(name = "scribe-server")]
#[command(about = "Relays shared-text updates between editors over WebSocket")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Name of the shared root text
    #[arg(long, default_value = scribe_collab::DEFAULT_TEXT_NAME)]
    text_name: String,

    /// Frames buffered per connection before it is dropped as too slow
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Scribe server starting");
    info!("Binding to {}", args.bind);

    let config = ServerConfig {
        bind_addr: args.bind,
        text_name: args.text_name,
        outbound_capacity: args.outbound_capacity,
        max_connections: args.max_connections,
        ..ServerConfig::default()
    };

    let server = SyncServer::bind(config).await?;
    info!("Serving text {:?} on {}", server.config().text_name, server.local_addr()?);

    server.run().await?;

    Ok(())
}
