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

//! Handler trait and callback implementation for the kinx server

use crate::{HandlerContext, Result, SessionContext, SessionInfo};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::net::TcpStream;

/// Session event handler trait
///
/// Implement this trait to receive session events. Every method has a default,
/// so implementers override only what they need.
///
/// # Example
///
/// ```no_run
/// use kinx_service::{Handler, HandlerContext, Result};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     async fn on_message(&self, ctx: HandlerContext) -> Result<()> {
///         ctx.reply().await
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called once a connection has been admitted, before any message is read
    ///
    /// The returned context is threaded into every message callback of the
    /// session. Values in a context shared between sessions are shared too;
    /// stopping one session never cancels another, but cancelling the
    /// returned context stops every session that was given it.
    async fn on_connect(&self, _stream: &TcpStream) -> SessionContext {
        SessionContext::new()
    }

    /// Called for every decoded message
    ///
    /// Returning an error stops the session.
    async fn on_message(&self, _ctx: HandlerContext) -> Result<()> {
        Ok(())
    }

    /// Called exactly once when the session stops
    ///
    /// Errors are logged and otherwise ignored.
    async fn on_closed(&self, _info: &SessionInfo) -> Result<()> {
        Ok(())
    }
}

type ConnectFn = Box<dyn Fn(&TcpStream) -> SessionContext + Send + Sync + 'static>;
type MessageFn = Box<dyn Fn(HandlerContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static>;
type ClosedFn = Box<dyn Fn(&SessionInfo) -> Result<()> + Send + Sync + 'static>;

/// Callback-based handler implementation
///
/// Registers each hook independently with a closure instead of implementing
/// [`Handler`]. Unregistered hooks behave like the trait defaults.
///
/// # Example
///
/// ```no_run
/// use kinx_service::{CallbackHandler, HandlerContext};
///
/// let handler = CallbackHandler::new()
///     .with_message(|ctx: HandlerContext| async move { ctx.reply().await })
///     .with_closed(|info| {
///         println!("{} closed", info.id);
///         Ok(())
///     });
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    on_connect: Option<ConnectFn>,
    on_message: Option<MessageFn>,
    on_closed: Option<ClosedFn>,
}

impl CallbackHandler {
    /// Create a handler with no hooks registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the connect hook
    pub fn with_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&TcpStream) -> SessionContext + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(f));
        self
    }

    /// Register the message hook
    pub fn with_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_message = Some(Box::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Register the close hook
    pub fn with_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionInfo) -> Result<()> + Send + Sync + 'static,
    {
        self.on_closed = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl Handler for CallbackHandler {
    async fn on_connect(&self, stream: &TcpStream) -> SessionContext {
        match &self.on_connect {
            Some(f) => f(stream),
            None => SessionContext::new(),
        }
    }

    async fn on_message(&self, ctx: HandlerContext) -> Result<()> {
        match &self.on_message {
            Some(f) => f(ctx).await,
            None => Ok(()),
        }
    }

    async fn on_closed(&self, info: &SessionInfo) -> Result<()> {
        match &self.on_closed {
            Some(f) => f(info),
            None => Ok(()),
        }
    }
}
