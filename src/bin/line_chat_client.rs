//! Line chat client - console entry point
//!
//! Sends every stdin line to the server and prints every line received.
//! Lost connections are retried in the background.

use std::env;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use line_chat::{ChatClient, ClientEvent, DEFAULT_HOST, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_chat=warn")),
        )
        .init();

    // Optional `host:port` argument
    let (host, port) = match env::args().nth(1) {
        Some(arg) => match arg.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse()?),
            None => (arg, DEFAULT_PORT),
        },
        None => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
    };

    let client = Arc::new(ChatClient::new(host.clone(), port));
    if let Err(e) = client.ensure_connected().await {
        warn!("Cannot connect to server: {}", e);
    } else {
        println!("Connected to server");
    }

    let (listener, mut events) = Arc::clone(&client).spawn_listener();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Line(line)) => println!("{}", line),
                Some(ClientEvent::Connected { server }) => println!("Connected to {}", server),
                Some(ClientEvent::Reconnected { server }) => println!("Reconnected to {}", server),
                Some(ClientEvent::ConnectFailed { reason }) => warn!("Unable to connect: {}", reason),
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(text)) => {
                    if !text.trim().is_empty() && !client.send(&text).await {
                        warn!("Not connected; message dropped");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
        }
    }

    drop(events);
    let _ = listener.await;
    client.disconnect().await;
    info!("Client exited");

    Ok(())
}
