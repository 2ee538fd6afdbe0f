//! Line chat server - console entry point
//!
//! Starts the server, then treats every stdin line as an operator
//! broadcast. Ctrl-C or end of stdin shuts the server down.

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use line_chat::config::default_addr;
use line_chat::{start_server, EventLog};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args().nth(1).unwrap_or_else(default_addr);

    let mut server = match start_server(addr.as_str(), EventLog::tracing_only()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to launch server: {}", e);
            return Err(e.into());
        }
    };
    info!("Type a message and hit Enter to broadcast");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line {
                Ok(Some(text)) => {
                    server.broadcast_local(&text);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    server.shutdown().await;

    Ok(())
}
