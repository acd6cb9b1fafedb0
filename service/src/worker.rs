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

//! Session role tasks
//!
//! Every admitted session runs two or three cooperating tasks:
//! - the reader decodes messages and dispatches them to the handler
//! - the writer drains the outbound queue onto the connection
//! - the idle timer (optional) evicts sessions that stop talking
//!
//! The reader is the role that normally calls [`Session::stop`]. Closing the
//! outbound queue is the only thing that ends the writer, and cancelling the
//! session context is the only thing that ends the idle timer.

use crate::{HandlerContext, KinxError, Session};
use metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Plaintext notice written to a peer evicted by its idle timer
pub const IDLE_TIMEOUT_NOTICE: &[u8] = b"idle timeout, closing session\n";

/// The tasks a session is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Decodes messages and runs the handler
    Reader,
    /// Drains the outbound queue
    Writer,
    /// Evicts idle sessions
    Heartbeat,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader => write!(f, "reader"),
            Self::Writer => write!(f, "writer"),
            Self::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Read messages until the session ends, then stop it
pub(crate) async fn run_reader(session: Arc<Session>) {
    debug!(session_id = %session.id(), role = %Role::Reader, "Role started");
    let wait = session.read_timeout();

    loop {
        match session.read(wait).await {
            Ok(message) => {
                session.notify_activity();
                let start = Instant::now();
                let result = session
                    .handler()
                    .on_message(HandlerContext::new(session.clone(), message))
                    .await;
                histogram!("kinx.message.handle_duration").record(start.elapsed().as_secs_f64());

                if let Err(e) = result {
                    warn!(session_id = %session.id(), error = %e, "Handler failed, stopping session");
                    session.metrics().handler_error();
                    break;
                }
            }
            Err(e) if e.is_recoverable() => continue,
            Err(KinxError::SessionClosed) => break,
            Err(KinxError::ConnectionClosed) => {
                debug!(session_id = %session.id(), "Peer closed connection");
                break;
            }
            Err(e) if e.is_terminal() => {
                debug!(session_id = %session.id(), error = %e, "Read failed");
                break;
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Unexpected read error");
                break;
            }
        }
    }

    session.stop().await;
    session.release_reader().await;
    debug!(session_id = %session.id(), role = %Role::Reader, "Role exited");
}

/// Write queued messages until the queue is closed
///
/// Write errors are counted and logged but never end the role.
pub(crate) async fn run_writer(session: Arc<Session>) {
    let Some(mut outbound) = session.take_outbound().await else {
        return;
    };
    debug!(session_id = %session.id(), role = %Role::Writer, "Role started");

    while let Some(message) = outbound.recv().await {
        if let Err(e) = session.write(&message).await {
            counter!("kinx.errors.write").increment(1);
            session.metrics().write_error();
            warn!(session_id = %session.id(), message_id = message.id(), error = %e, "Dropped outbound message");
        }
    }

    debug!(session_id = %session.id(), role = %Role::Writer, "Role exited");
}

/// Close the session after `idle` without a received message
pub(crate) async fn run_heartbeat(session: Arc<Session>, idle: Duration) {
    debug!(session_id = %session.id(), role = %Role::Heartbeat, ?idle, "Role started");
    let cancel = session.context().cancellation_token().clone();

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = session.activity() => trace!(session_id = %session.id(), "Activity"),
            _ = sleep(idle) => {
                debug!(session_id = %session.id(), "Idle timeout, evicting session");
                if let Err(e) = session.write_raw(IDLE_TIMEOUT_NOTICE).await {
                    trace!(session_id = %session.id(), error = %e, "Idle notice not delivered");
                }
                counter!("kinx.sessions.idle_evicted").increment(1);
                session.metrics().idle_eviction();
                session.stop().await;
                break;
            }
        }
    }

    debug!(session_id = %session.id(), role = %Role::Heartbeat, "Role exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallbackHandler, Handler, ServerConfig, ServerMetrics, SessionContext, SessionId};
    use kinx_codec::{Message, Packer, StreamPacker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn pair(handler: Arc<dyn Handler>, config: &ServerConfig) -> (Arc<Session>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let session = Session::new(
            SessionId::new(7),
            server,
            SessionContext::new(),
            handler,
            config,
            Arc::new(ServerMetrics::new()),
        )
        .unwrap();
        (Arc::new(session), client)
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Reader.to_string(), "reader");
        assert_eq!(Role::Heartbeat.to_string(), "heartbeat");
    }

    #[tokio::test]
    async fn test_reader_and_writer_echo() {
        let handler = Arc::new(CallbackHandler::new().with_message(|ctx: HandlerContext| async move {
            let session = ctx.session().clone();
            session.send(ctx.into_message()).await
        }));
        let config = ServerConfig::default();
        let (session, mut client) = pair(handler, &config).await;

        let reader = tokio::spawn(run_reader(session.clone()));
        let writer = tokio::spawn(run_writer(session.clone()));

        let message = Message::new(3, "echo me");
        let frame = StreamPacker::new().pack(&message).unwrap();
        client.write_all(&frame).await.unwrap();

        let echoed = StreamPacker::new().unpack(&mut client).await.unwrap();
        assert_eq!(echoed, message);

        drop(client);
        reader.await.unwrap();
        writer.await.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_reader_survives_read_timeouts() {
        let handler = Arc::new(CallbackHandler::new().with_message(|ctx: HandlerContext| async move {
            ctx.reply().await
        }));
        let config = ServerConfig::default().with_read_timeout(Duration::from_millis(10));
        let (session, mut client) = pair(handler, &config).await;
        let reader = tokio::spawn(run_reader(session.clone()));

        // Several read timeouts pass before anything is sent.
        sleep(Duration::from_millis(100)).await;
        assert!(!session.is_closed());

        let message = Message::new(8, "after a pause");
        client
            .write_all(&StreamPacker::new().pack(&message).unwrap())
            .await
            .unwrap();
        assert_eq!(StreamPacker::new().unpack(&mut client).await.unwrap(), message);

        drop(client);
        reader.await.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_handler_error_stops_session() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let handler = Arc::new(
            CallbackHandler::new()
                .with_message(|_ctx: HandlerContext| async { Err(KinxError::handler("refused")) })
                .with_closed(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        );
        let (session, mut client) = pair(handler, &ServerConfig::default()).await;
        let reader = tokio::spawn(run_reader(session.clone()));

        let frame = StreamPacker::new().pack(&Message::new(1, "x")).unwrap();
        client.write_all(&frame).await.unwrap();
        reader.await.unwrap();

        assert!(session.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(session.metrics().snapshot().handler_errors, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_evicts_idle_session() {
        let config = ServerConfig::default().with_idle_timeout(Some(Duration::from_millis(50)));
        let (session, mut client) = pair(Arc::new(CallbackHandler::new()), &config).await;
        let heartbeat = tokio::spawn(run_heartbeat(session.clone(), Duration::from_millis(50)));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        heartbeat.await.unwrap();

        assert_eq!(received, IDLE_TIMEOUT_NOTICE);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_exits_on_cancel() {
        let (session, _client) = pair(Arc::new(CallbackHandler::new()), &ServerConfig::default()).await;
        let heartbeat = tokio::spawn(run_heartbeat(session.clone(), Duration::from_secs(60)));

        session.stop().await;
        tokio::time::timeout(Duration::from_secs(1), heartbeat)
            .await
            .unwrap()
            .unwrap();
    }
}
