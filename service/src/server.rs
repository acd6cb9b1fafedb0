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

//! Kinx server implementation
//!
//! The KinxServer owns the listener and turns accepted connections into
//! sessions. It can be driven two ways:
//!
//! - [`KinxServer::run`] owns an accept loop that admits connections against
//!   the worker pool and starts each session's role tasks.
//! - [`KinxServer::async_run`] only binds; the caller then pulls sessions one
//!   at a time with [`KinxServer::get_session`] and drives them itself.

use crate::worker::{run_heartbeat, run_reader, run_writer};
use crate::{
    Handler, KinxError, Result, ServerConfig, ServerMetrics, ServerSnapshot, Session,
    SessionId, SessionManager, WorkerPool,
};
use metrics::counter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Plaintext notice written to a connection refused for lack of capacity
pub const SERVER_BUSY_NOTICE: &[u8] = b"server busy, please try again later\n";

/// Stop signal of the current run
#[derive(Debug)]
struct Lifecycle {
    token: CancellationToken,
    pull_mode: bool,
}

/// Kinx TCP session server
///
/// # Example
///
/// ```no_run
/// use kinx_service::{Handler, HandlerContext, KinxServer, Result, ServerConfig};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     async fn on_message(&self, ctx: HandlerContext) -> Result<()> {
///         ctx.reply().await
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let server = Arc::new(KinxServer::new(ServerConfig::default(), Arc::new(Echo)));
///
///     let runner = server.clone();
///     let task = tokio::spawn(async move { runner.run().await });
///
///     // ... later
///     server.shutdown()?;
///     task.await.ok();
///     Ok(())
/// }
/// ```
pub struct KinxServer {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    pool: WorkerPool,
    manager: Arc<SessionManager>,
    metrics: Arc<ServerMetrics>,
    /// Next session ID (monotonically increasing, starts at 1)
    next_id: Arc<AtomicU32>,
    running: AtomicBool,
    lifecycle: Mutex<Option<Lifecycle>>,
    bound: watch::Sender<Option<SocketAddr>>,
    /// Listener held between `async_run` and `get_session`
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    started_at: Instant,
}

impl KinxServer {
    /// Create a server; nothing is bound until it is run
    pub fn new(config: ServerConfig, handler: Arc<dyn Handler>) -> Self {
        let pool = WorkerPool::new(config.pool_capacity);
        Self {
            config,
            handler,
            pool,
            manager: Arc::new(SessionManager::new()),
            metrics: Arc::new(ServerMetrics::new()),
            next_id: Arc::new(AtomicU32::new(1)),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(None),
            bound: watch::Sender::new(None),
            listener: tokio::sync::Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Bind and serve until [`KinxServer::shutdown`] is called
    ///
    /// Returns bind and configuration errors. Sessions that are open when the
    /// server shuts down keep running until they end on their own.
    ///
    /// # Panics
    ///
    /// Panics if the server is already running.
    #[instrument(skip(self), fields(name = %self.config.name))]
    pub async fn run(&self) -> Result<()> {
        let token = self.begin(false);
        let _guard = RunGuard(self);

        self.config.validate()?;
        let (listener, _) = self.bind().await?;

        let acceptor = Acceptor {
            config: self.config.clone(),
            handler: self.handler.clone(),
            pool: self.pool.clone(),
            manager: self.manager.clone(),
            metrics: self.metrics.clone(),
            next_id: self.next_id.clone(),
        };
        let accept_loop = tokio::spawn(acceptor.run(listener, token.clone()));

        token.cancelled().await;
        if let Err(e) = accept_loop.await {
            error!(error = %e, "Accept loop failed");
        }
        info!("Server stopped");
        Ok(())
    }

    /// Bind and return immediately, for use with [`KinxServer::get_session`]
    ///
    /// # Panics
    ///
    /// Panics if the server is already running.
    pub async fn async_run(&self) -> Result<SocketAddr> {
        self.begin(true);

        let bound = match self.config.validate() {
            Ok(()) => self.bind().await,
            Err(e) => Err(e),
        };
        match bound {
            Ok((listener, addr)) => {
                *self.listener.lock().await = Some(listener);
                Ok(addr)
            }
            Err(e) => {
                self.end_pull_mode();
                Err(e)
            }
        }
    }

    /// Accept one connection and hand back its session
    ///
    /// The session gets no role tasks and is not admission checked; the
    /// caller reads, writes and stops it directly. Returns
    /// [`KinxError::ServerNotRunning`] once the server is shut down.
    pub async fn get_session(&self) -> Result<Arc<Session>> {
        let token = self
            .lock_lifecycle()
            .as_ref()
            .map(|l| l.token.clone())
            .ok_or(KinxError::ServerNotRunning)?;

        let mut guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return Err(KinxError::ServerNotRunning);
        };
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            accepted = listener.accept() => Some(accepted),
        };
        let (stream, peer_addr) = match accepted {
            None => {
                guard.take();
                return Err(KinxError::ServerNotRunning);
            }
            Some(accepted) => accepted?,
        };
        drop(guard);

        let id = allocate_id(&self.next_id)?;
        debug!(session_id = %id, peer_addr = %peer_addr, "Accepted connection");
        let context = self.handler.on_connect(&stream).await;
        let session = Session::new(
            id,
            stream,
            context,
            self.handler.clone(),
            &self.config,
            self.metrics.clone(),
        )?;
        Ok(Arc::new(session))
    }

    /// Stop accepting connections
    ///
    /// Makes [`KinxServer::run`] return, or ends pull mode. Returns
    /// [`KinxError::ServerNotRunning`] if there is nothing to stop.
    pub fn shutdown(&self) -> Result<()> {
        let lifecycle = self
            .lock_lifecycle()
            .take()
            .ok_or(KinxError::ServerNotRunning)?;
        info!(name = %self.config.name, "Shutting down server");
        lifecycle.token.cancel();

        if lifecycle.pull_mode {
            self.end_pull_mode();
            // A pending get_session drops the listener itself.
            if let Ok(mut listener) = self.listener.try_lock() {
                listener.take();
            }
        }
        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Wait until the listener is bound
    pub async fn wait_bound(&self) -> Result<SocketAddr> {
        let mut rx = self.bound.subscribe();
        let addr = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| KinxError::ServerNotRunning)?;
        addr.ok_or(KinxError::ServerNotRunning)
    }

    /// Get the number of live sessions started by the accept loop
    pub fn session_count(&self) -> usize {
        self.manager.count()
    }

    /// Get the session registry
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Get the worker pool used for admission
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            name: self.config.name.clone(),
            active_sessions: self.manager.count(),
            total_sessions: self.metrics.total_sessions(),
            bind_address: self.local_addr(),
            running_workers: self.pool.running(),
            free_workers: self.pool.free(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Mark the server running and install a fresh stop signal
    fn begin(&self, pull_mode: bool) -> CancellationToken {
        assert!(
            !self.running.swap(true, Ordering::SeqCst),
            "server already running"
        );
        let token = CancellationToken::new();
        *self.lock_lifecycle() = Some(Lifecycle {
            token: token.clone(),
            pull_mode,
        });
        token
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        self.bound.send_replace(Some(addr));
        info!(name = %self.config.name, address = %addr, "Server listening");
        Ok((listener, addr))
    }

    fn end_pull_mode(&self) {
        self.lock_lifecycle().take();
        self.bound.send_replace(None);
        self.running.store(false, Ordering::SeqCst);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Option<Lifecycle>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KinxServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinxServer")
            .field("name", &self.config.name)
            .field("bind_address", &self.local_addr())
            .field("running", &self.is_running())
            .field("session_count", &self.session_count())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for KinxServer {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lock_lifecycle().take() {
            warn!(name = %self.config.name, "KinxServer dropped while still running");
            lifecycle.token.cancel();
        }
    }
}

/// Resets the running state when `run` returns or its future is dropped
struct RunGuard<'a>(&'a KinxServer);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        // Cancelling here also stops the accept loop if `run` was abandoned.
        if let Some(lifecycle) = self.0.lock_lifecycle().take() {
            lifecycle.token.cancel();
        }
        self.0.bound.send_replace(None);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// State moved into the accept loop task
struct Acceptor {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    pool: WorkerPool,
    manager: Arc<SessionManager>,
    metrics: Arc<ServerMetrics>,
    next_id: Arc<AtomicU32>,
}

impl Acceptor {
    async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        debug!("Accept loop started");
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr).await,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    // Back off on errors to avoid tight loop
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        info!("Accept loop terminated");
    }

    async fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let required = self.config.workers_per_session();
        let mut reservation = match self.pool.try_reserve(required) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(peer_addr = %peer_addr, error = %e, "Rejecting connection");
                self.metrics.session_rejected();
                counter!("kinx.sessions.rejected").increment(1);
                tokio::spawn(reject(stream, self.config.write_timeout));
                return;
            }
        };

        let id = match allocate_id(&self.next_id) {
            Ok(id) => id,
            Err(e) => {
                error!(peer_addr = %peer_addr, error = %e, "Dropping connection");
                return;
            }
        };
        let context = self.handler.on_connect(&stream).await;
        let session = match Session::new(
            id,
            stream,
            context,
            self.handler.clone(),
            &self.config,
            self.metrics.clone(),
        ) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!(session_id = %id, peer_addr = %peer_addr, error = %e, "Failed to create session");
                return;
            }
        };
        self.manager.insert(session.clone());
        info!(session_id = %id, peer_addr = %peer_addr, "Session started");

        let manager = self.manager.clone();
        let reader = session.clone();
        reservation.spawn(async move {
            run_reader(reader).await;
            manager.remove(id);
        });
        reservation.spawn(run_writer(session.clone()));
        if let Some(idle) = session.idle_timeout() {
            reservation.spawn(run_heartbeat(session, idle));
        }
    }
}

/// Take the next session id; ids are never handed out twice
fn allocate_id(next_id: &AtomicU32) -> Result<SessionId> {
    next_id
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
        .map(SessionId::new)
        .map_err(|_| KinxError::Other("session ids exhausted".to_string()))
}

/// Tell a refused peer why and hang up
async fn reject(mut stream: TcpStream, write_timeout: Duration) {
    match timeout(write_timeout, stream.write_all(SERVER_BUSY_NOTICE)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(error = %e, "Busy notice not delivered"),
        Err(_) => trace!("Busy notice timed out"),
    }
    if let Err(e) = stream.shutdown().await {
        trace!(error = %e, "Shutdown of refused connection failed");
    }
}
