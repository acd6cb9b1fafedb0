//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Echo Server Example
//!
//! This example demonstrates a kinx server that:
//! - Loads its address from `config/kinx.json` (or a path given as argument)
//! - Echoes every message back with the same id
//! - Keeps a per-session message count in the session context
//! - Evicts sessions that stay silent for 60 seconds
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! cargo run -p kinx-service --example echo_server
//! cargo run -p kinx-service --example echo_server -- path/to/kinx.json --callbacks
//! ```
//!
//! Talk to it:
//! ```bash
//! cargo run -p kinx-client --example echo_client
//! ```

use async_trait::async_trait;
use kinx_service::{
    CallbackHandler, DEFAULT_CONFIG_FILE, Handler, HandlerContext, KinxServer, Result,
    ServerConfig, SessionContext, SessionInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const PEER: &str = "peer";
const COUNT: &str = "count";

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let use_callbacks = args.iter().any(|a| a == "--callbacks");
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_FILE);

    let config = ServerConfig::load(path).with_idle_timeout(Some(Duration::from_secs(60)));
    let handler: Arc<dyn Handler> = if use_callbacks {
        Arc::new(callback_handler())
    } else {
        Arc::new(EchoHandler)
    };

    println!("Starting {} on {}", config.name, config.bind_address());
    println!("Press Ctrl+C to stop the server\n");
    let server = Arc::new(KinxServer::new(config, handler));

    let runner = server.clone();
    let mut task = tokio::spawn(async move { runner.run().await });

    // Bind failures end the run task before the listener is ever published.
    tokio::select! {
        result = &mut task => {
            result??;
            return Ok(());
        }
        addr = server.wait_bound() => println!("Listening on {}", addr?),
    }

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down server...");
    server.shutdown()?;
    task.await??;

    let snapshot = server.metrics().snapshot();
    println!(
        "Server stopped after {} sessions and {} messages",
        snapshot.total_sessions, snapshot.messages_received
    );
    Ok(())
}

/// Handler implemented as a trait object
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_connect(&self, stream: &TcpStream) -> SessionContext {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        tracing::info!("Client {} connected", peer);
        SessionContext::new()
            .with_value(PEER, peer)
            .with_value(COUNT, 0u64)
    }

    async fn on_message(&self, ctx: HandlerContext) -> Result<()> {
        let count = ctx.context().get::<u64>(COUNT).unwrap_or(0) + 1;
        ctx.context().set(COUNT, count);
        tracing::debug!(
            "Message {} from {}: id={} len={}",
            count,
            ctx.context().get::<String>(PEER).unwrap_or_default(),
            ctx.message().id(),
            ctx.message().len()
        );
        ctx.reply().await
    }

    async fn on_closed(&self, info: &SessionInfo) -> Result<()> {
        tracing::info!(
            "Client {} left after {:?} ({} messages)",
            info.peer_addr,
            info.duration(),
            info.messages_received
        );
        Ok(())
    }
}

/// The same behaviour registered as independent callbacks
fn callback_handler() -> CallbackHandler {
    CallbackHandler::new()
        .with_connect(|_stream| SessionContext::new().with_value(COUNT, 0u64))
        .with_message(|ctx: HandlerContext| async move {
            let session = ctx.session().clone();
            session.send(ctx.into_message()).await
        })
        .with_closed(|info| {
            tracing::info!("Session {} closed", info.id);
            Ok(())
        })
}
