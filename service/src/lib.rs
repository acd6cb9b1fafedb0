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

//! Kinx TCP Session Server
//!
//! This crate turns accepted TCP connections into managed sessions that
//! exchange length-prefixed binary messages (see [`kinx_codec`]) and hands
//! every decoded message to an application [`Handler`].
//!
//! - Each session runs a reader, a writer and an optional idle timer as
//!   separate tasks, and tears all of them down exactly once.
//! - Every role task holds a slot in a bounded [`WorkerPool`]; a connection
//!   that cannot get enough slots is told the server is busy and closed.
//! - Handlers are either a [`Handler`] implementation or a
//!   [`CallbackHandler`] built from closures.
//!
//! # Architecture
//!
//! ```text
//! KinxServer
//!     ↓ accept + admission (WorkerPool)
//! Session ── reader ──→ Handler::on_message
//!         ── writer ←── Session::send
//!         ── heartbeat (idle timeout)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use kinx_service::{CallbackHandler, HandlerContext, KinxServer, ServerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load(kinx_service::DEFAULT_CONFIG_FILE)
//!         .with_idle_timeout(Some(Duration::from_secs(60)));
//!
//!     let handler = CallbackHandler::new().with_message(|ctx: HandlerContext| async move {
//!         ctx.reply().await
//!     });
//!
//!     let server = KinxServer::new(config, Arc::new(handler));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod error;
mod handler;
mod manager;
mod metrics;
mod pool;
mod server;
mod session;
mod types;
mod worker;

pub use self::config::{
    DEFAULT_CONFIG_FILE, DEFAULT_HOST, DEFAULT_NAME, DEFAULT_PORT, ServerConfig,
};
pub use self::context::{HandlerContext, SessionContext};
pub use self::error::{KinxError, Result};
pub use self::handler::{CallbackHandler, Handler};
pub use self::manager::{BroadcastResult, SessionManager};
pub use self::metrics::{MetricsSnapshot, ServerMetrics};
pub use self::pool::{Reservation, WorkerPool};
pub use self::server::{KinxServer, SERVER_BUSY_NOTICE};
pub use self::session::Session;
pub use self::types::{ServerSnapshot, SessionId, SessionInfo, SessionState};
pub use self::worker::{IDLE_TIMEOUT_NOTICE, Role};

pub use kinx_codec::{Message, Packer};
