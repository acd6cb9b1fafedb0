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

//! Session implementation
//!
//! A [`Session`] owns one accepted TCP connection. The stream is split so the
//! read half and the write half can be used from different tasks: the reader
//! role is the only user of the read half, while the write half is shared by
//! the writer role, the idle timer and direct [`Session::write`] calls behind
//! an async mutex.
//!
//! Teardown goes through [`Session::stop`], which runs at most once per
//! session no matter how many tasks race to call it.

use crate::{Handler, KinxError, Result, ServerConfig, ServerMetrics, SessionContext};
use crate::{SessionId, SessionInfo, SessionState};
use kinx_codec::{Message, Packer, StreamPacker};
use metrics::{counter, gauge};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

/// One managed client connection
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    state: AtomicU8,

    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,

    // Dropping the sender is what closes the queue.
    outbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,

    activity: Notify,
    context: SessionContext,
    handler: Arc<dyn Handler>,
    packer: StreamPacker,

    idle_timeout: Option<Duration>,
    read_timeout: Duration,
    write_timeout: Duration,

    created_at: Instant,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    metrics: Arc<ServerMetrics>,
}

impl Session {
    /// Wrap an accepted stream
    pub(crate) fn new(
        id: SessionId,
        stream: TcpStream,
        context: SessionContext,
        handler: Arc<dyn Handler>,
        config: &ServerConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);

        metrics.session_opened();
        counter!("kinx.sessions.total").increment(1);
        gauge!("kinx.sessions.active").increment(1.0);
        debug!(session_id = %id, peer_addr = %peer_addr, "Session created");

        Ok(Self {
            id,
            peer_addr,
            local_addr,
            state: AtomicU8::new(SessionState::Active.as_u8()),
            reader: Mutex::new(Some(BufReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
            outbound_tx: Mutex::new(Some(outbound_tx)),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            activity: Notify::new(),
            context: context.for_session(),
            handler,
            packer: StreamPacker::new().with_max_payload_len(config.max_payload_len),
            idle_timeout: config.idle_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            created_at: Instant::now(),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            metrics,
        })
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address of the peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address the connection was accepted on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Context returned by the connect hook
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Idle timeout, if the idle timer is enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Timeout used by the reader role for each read
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if [`Session::stop`] has started
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Get a snapshot of the session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state(),
            peer_addr: self.peer_addr,
            local_addr: self.local_addr,
            created_at: self.created_at,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }

    /// Read the next message
    ///
    /// Waits up to `wait` for a frame to start arriving and returns
    /// [`KinxError::Timeout`] if none does; callers may simply try again. Once
    /// the first byte is in, the rest of the frame must follow within the same
    /// duration, otherwise the stream can no longer be trusted and an I/O
    /// error is returned.
    ///
    /// Peer EOF is reported as [`KinxError::ConnectionClosed`] and a stopped
    /// session as [`KinxError::SessionClosed`].
    #[instrument(level = "trace", skip(self), fields(session_id = %self.id))]
    pub async fn read(&self, wait: Duration) -> Result<Message> {
        if self.is_closed() {
            return Err(KinxError::SessionClosed);
        }
        let cancel = self.context.cancellation_token().clone();
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(KinxError::SessionClosed);
        };

        // fill_buf is cancel safe, so nothing is lost when the wait times out.
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            filled = timeout(wait, reader.fill_buf()) => {
                Some(filled.map(|r| r.map(|buf| buf.len())))
            }
        };
        match started {
            None => {
                guard.take();
                return Err(KinxError::SessionClosed);
            }
            Some(Err(_)) => return Err(KinxError::Timeout),
            Some(Ok(Err(e))) => return Err(e.into()),
            Some(Ok(Ok(0))) => return Err(KinxError::ConnectionClosed),
            Some(Ok(Ok(_))) => {}
        }

        let Some(reader) = guard.as_mut() else {
            return Err(KinxError::SessionClosed);
        };
        let unpacked = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = timeout(wait, self.packer.unpack(reader)) => Some(message),
        };
        let message = match unpacked {
            None => {
                guard.take();
                return Err(KinxError::SessionClosed);
            }
            Some(Err(_)) => {
                return Err(KinxError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "frame stalled before completion",
                )));
            }
            Some(Ok(result)) => result?,
        };
        drop(guard);

        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.metrics.message_received(message.wire_len() as u64);
        counter!("kinx.messages.received").increment(1);
        trace!(message_id = message.id(), length = message.len(), "Message received");
        Ok(message)
    }

    /// Pack and write a message directly to the connection
    ///
    /// Returns the first error encountered without retrying. Direct writes are
    /// not ordered against messages queued with [`Session::send`].
    #[instrument(level = "trace", skip(self, message), fields(session_id = %self.id, message_id = message.id()))]
    pub async fn write(&self, message: &Message) -> Result<()> {
        let frame = self.packer.pack(message)?;
        self.write_raw(&frame).await?;

        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.metrics.message_sent(frame.len() as u64);
        counter!("kinx.messages.sent").increment(1);
        Ok(())
    }

    /// Queue a message for the writer role
    ///
    /// Queued messages reach the wire in the order they were queued. Waits
    /// while the queue is full, and fails with [`KinxError::SessionClosed`]
    /// once the session has stopped. Sessions obtained in pull mode have no
    /// writer role, so nothing drains their queue.
    pub async fn send(&self, message: Message) -> Result<()> {
        let tx = self
            .outbound_tx
            .lock()
            .await
            .clone()
            .ok_or(KinxError::SessionClosed)?;
        tx.send(message).await.map_err(|_| KinxError::SessionClosed)
    }

    /// Stop the session
    ///
    /// The first call closes the outbound queue, cancels the session context,
    /// runs the close hook and closes the connection. Later calls return
    /// immediately.
    pub async fn stop(&self) {
        if self
            .state
            .compare_exchange(
                SessionState::Active.as_u8(),
                SessionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        debug!(session_id = %self.id, "Stopping session");

        // Dropping the receiver as well fails any send still waiting for room,
        // even when no writer role ever claimed the queue.
        self.outbound_tx.lock().await.take();
        self.outbound_rx.lock().await.take();
        self.context.cancellation_token().cancel();

        if let Err(e) = self.handler.on_closed(&self.info()).await {
            warn!(session_id = %self.id, error = %e, "Close hook failed");
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                trace!(session_id = %self.id, error = %e, "Shutdown of write half failed");
            }
        }
        // A reader blocked in `read` sees the cancellation and drops its half.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        self.state
            .store(SessionState::Closed.as_u8(), Ordering::Release);
        self.metrics.session_closed(self.created_at.elapsed());
        gauge!("kinx.sessions.active").decrement(1.0);
        debug!(session_id = %self.id, duration = ?self.created_at.elapsed(), "Session closed");
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub(crate) fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Tell the idle timer the peer is alive
    pub(crate) fn notify_activity(&self) {
        self.activity.notify_one();
    }

    /// Resolves on the next activity signal
    pub(crate) async fn activity(&self) {
        self.activity.notified().await
    }

    /// Hand the outbound queue to the writer role
    pub(crate) async fn take_outbound(&self) -> Option<mpsc::Receiver<Message>> {
        self.outbound_rx.lock().await.take()
    }

    /// Drop the read half once the reader role is done with it
    pub(crate) async fn release_reader(&self) {
        self.reader.lock().await.take();
    }

    /// Write bytes that are not a frame, such as a plaintext notice
    pub(crate) async fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(KinxError::SessionClosed)?;
        match timeout(self.write_timeout, writer.write_all(bytes)).await {
            Ok(result) => result.map_err(KinxError::from),
            Err(_) => Err(KinxError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "write timed out",
            ))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Sessions dropped without stop (pull mode) still release their
        // cancellation token and accounting.
        if self.state() == SessionState::Active {
            self.context.cancellation_token().cancel();
            self.metrics.session_closed(self.created_at.elapsed());
            gauge!("kinx.sessions.active").decrement(1.0);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
