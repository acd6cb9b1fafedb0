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

//! End-to-end tests against a running server on a loopback port

use async_trait::async_trait;
use kinx_client::KinxClient;
use kinx_service::{
    CallbackHandler, Handler, HandlerContext, IDLE_TIMEOUT_NOTICE, KinxError, KinxServer,
    Message, Result, SERVER_BUSY_NOTICE, ServerConfig, SessionContext, SessionInfo,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn local() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

fn echo() -> Arc<dyn Handler> {
    Arc::new(CallbackHandler::new().with_message(|ctx: HandlerContext| async move {
        ctx.reply().await
    }))
}

async fn start(
    config: ServerConfig,
    handler: Arc<dyn Handler>,
) -> (Arc<KinxServer>, SocketAddr, JoinHandle<Result<()>>) {
    let server = Arc::new(KinxServer::new(config, handler));
    let runner = server.clone();
    let task = tokio::spawn(async move { runner.run().await });
    let addr = timeout(WAIT, server.wait_bound()).await.unwrap().unwrap();
    (server, addr, task)
}

async fn stop(server: Arc<KinxServer>, task: JoinHandle<Result<()>>) {
    server.shutdown().unwrap();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

/// Read everything until the server hangs up
async fn read_until_closed(addr: SocketAddr) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut received = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    received
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_echo_round_trip() {
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = seen.clone();
    let handler = Arc::new(CallbackHandler::new().with_message(move |ctx: HandlerContext| {
        let observed = observed.clone();
        async move {
            assert_eq!(ctx.message().id(), 1001);
            assert_eq!(ctx.message().payload().as_ref(), b"hello");
            observed.fetch_add(1, Ordering::SeqCst);
            ctx.reply().await
        }
    }));
    let (server, addr, task) = start(local(), handler).await;

    let mut client = KinxClient::connect(addr).await.unwrap();
    client.send(Message::new(1001, "hello")).await.unwrap();
    let reply = client.recv_timeout(WAIT).await.unwrap().unwrap();

    assert_eq!(reply, Message::new(1001, "hello"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    stop(server, task).await;
}

#[tokio::test]
async fn test_idle_session_gets_notice_then_close() {
    let config = local().with_idle_timeout(Some(Duration::from_millis(200)));
    let (server, addr, task) = start(config, echo()).await;

    let received = read_until_closed(addr).await;
    assert_eq!(received, IDLE_TIMEOUT_NOTICE);

    eventually(|| server.metrics().snapshot().idle_evictions == 1).await;
    eventually(|| server.session_count() == 0).await;
    stop(server, task).await;
}

#[tokio::test]
async fn test_active_session_never_idles_out() {
    let config = local().with_idle_timeout(Some(Duration::from_millis(300)));
    let (server, addr, task) = start(config, echo()).await;

    let mut client = KinxClient::connect(addr).await.unwrap();
    for id in 0..10 {
        client.send(Message::new(id, "ping")).await.unwrap();
        assert_eq!(client.recv_timeout(WAIT).await.unwrap().unwrap().id(), id);
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(server.metrics().snapshot().idle_evictions, 0);
    assert_eq!(server.session_count(), 1);
    stop(server, task).await;
}

#[tokio::test]
async fn test_admission_rejects_when_pool_exhausted() {
    // Two slots fit exactly one session without an idle timer.
    let config = local().with_pool_capacity(2);
    let (server, addr, task) = start(config, echo()).await;

    let mut admitted = KinxClient::connect(addr).await.unwrap();
    admitted.send(Message::new(1, "first")).await.unwrap();
    assert!(admitted.recv_timeout(WAIT).await.unwrap().is_some());
    assert_eq!(server.pool().free(), 0);

    let refused = read_until_closed(addr).await;
    assert_eq!(refused, SERVER_BUSY_NOTICE);
    assert_eq!(server.metrics().snapshot().rejected_sessions, 1);
    assert_eq!(server.session_count(), 1);

    // The admitted session is unaffected.
    admitted.send(Message::new(2, "still here")).await.unwrap();
    assert_eq!(admitted.recv_timeout(WAIT).await.unwrap().unwrap().id(), 2);

    // Its slots come back once it leaves.
    admitted.close().await.unwrap();
    eventually(|| server.pool().free() == 2).await;
    stop(server, task).await;
}

#[tokio::test]
async fn test_idle_timer_needs_a_third_slot() {
    let config = local()
        .with_pool_capacity(5)
        .with_idle_timeout(Some(Duration::from_secs(30)));
    let (server, addr, task) = start(config, echo()).await;

    let mut admitted = KinxClient::connect(addr).await.unwrap();
    admitted.send(Message::new(1, "x")).await.unwrap();
    assert!(admitted.recv_timeout(WAIT).await.unwrap().is_some());
    assert_eq!(server.pool().running(), 3);

    // Two free slots are not enough for another session.
    assert_eq!(read_until_closed(addr).await, SERVER_BUSY_NOTICE);
    stop(server, task).await;
}

#[tokio::test]
async fn test_handler_error_closes_only_that_session() {
    let handler = Arc::new(CallbackHandler::new().with_message(|ctx: HandlerContext| async move {
        if ctx.message().id() == 13 {
            return Err(KinxError::handler("unlucky"));
        }
        ctx.reply().await
    }));
    let (server, addr, task) = start(local(), handler).await;

    let mut healthy = KinxClient::connect(addr).await.unwrap();
    let mut doomed = KinxClient::connect(addr).await.unwrap();

    doomed.send(Message::new(13, "boom")).await.unwrap();
    assert!(doomed.recv_timeout(WAIT).await.unwrap().is_none());

    healthy.send(Message::new(7, "fine")).await.unwrap();
    assert_eq!(healthy.recv_timeout(WAIT).await.unwrap().unwrap().id(), 7);
    assert_eq!(server.metrics().snapshot().handler_errors, 1);
    stop(server, task).await;
}

/// Tags every session with a name and answers with it
struct NameTag {
    next: AtomicU32,
    closed: AtomicUsize,
}

#[async_trait]
impl Handler for NameTag {
    async fn on_connect(&self, _stream: &TcpStream) -> SessionContext {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        SessionContext::new().with_value("name", format!("guest-{n}"))
    }

    async fn on_message(&self, mut ctx: HandlerContext) -> Result<()> {
        let name: String = ctx.context().get("name").unwrap_or_default();
        ctx.message_mut().set_payload(name);
        ctx.reply().await
    }

    async fn on_closed(&self, _info: &SessionInfo) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_connect_context_reaches_every_message() {
    let handler = Arc::new(NameTag {
        next: AtomicU32::new(1),
        closed: AtomicUsize::new(0),
    });
    let (server, addr, task) = start(local(), handler.clone()).await;

    let mut first = KinxClient::connect(addr).await.unwrap();
    first.send(Message::empty(1)).await.unwrap();
    assert_eq!(first.expect().await.unwrap().payload().as_ref(), b"guest-1");

    let mut second = KinxClient::connect(addr).await.unwrap();
    second.send(Message::empty(1)).await.unwrap();
    assert_eq!(second.expect().await.unwrap().payload().as_ref(), b"guest-2");

    first.send(Message::empty(2)).await.unwrap();
    assert_eq!(first.expect().await.unwrap().payload().as_ref(), b"guest-1");

    first.close().await.unwrap();
    second.close().await.unwrap();
    eventually(|| handler.closed.load(Ordering::SeqCst) == 2).await;
    stop(server, task).await;
}

#[tokio::test]
async fn test_broadcast_reaches_all_sessions() {
    let (server, addr, task) = start(local(), echo()).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(KinxClient::connect(addr).await.unwrap());
    }
    eventually(|| server.session_count() == 3).await;

    let result = server.sessions().broadcast(&Message::new(99, "news")).await;
    assert_eq!(result.total, 3);
    assert!(result.all_succeeded());

    for client in &mut clients {
        assert_eq!(client.recv_timeout(WAIT).await.unwrap().unwrap(), Message::new(99, "news"));
    }
    stop(server, task).await;
}

#[tokio::test]
async fn test_session_ids_are_sequential() {
    let (server, addr, task) = start(local(), echo()).await;

    let _a = KinxClient::connect(addr).await.unwrap();
    let _b = KinxClient::connect(addr).await.unwrap();
    eventually(|| server.session_count() == 2).await;

    let mut ids: Vec<u32> = server.sessions().ids().iter().map(|id| id.as_u32()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    stop(server, task).await;
}

#[tokio::test]
async fn test_shutdown_leaves_sessions_running() {
    let (server, addr, task) = start(local(), echo()).await;

    let mut client = KinxClient::connect(addr).await.unwrap();
    client.send(Message::new(1, "before")).await.unwrap();
    assert!(client.recv_timeout(WAIT).await.unwrap().is_some());

    stop(server.clone(), task).await;
    assert!(!server.is_running());
    assert!(TcpStream::connect(addr).await.is_err());

    client.send(Message::new(2, "after")).await.unwrap();
    assert_eq!(client.recv_timeout(WAIT).await.unwrap().unwrap().id(), 2);
}

#[tokio::test]
async fn test_pull_mode_session() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    let handler = Arc::new(CallbackHandler::new().with_closed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    let server = KinxServer::new(local(), handler);
    let addr = server.async_run().await.unwrap();

    let client = tokio::spawn(async move {
        let mut client = KinxClient::connect(addr).await.unwrap();
        client.send(Message::new(5, "pull")).await.unwrap();
        client.expect().await.unwrap()
    });

    let session = timeout(WAIT, server.get_session()).await.unwrap().unwrap();
    assert_eq!(session.id().as_u32(), 1);

    let message = session.read(WAIT).await.unwrap();
    session.write(&message).await.unwrap();
    assert_eq!(client.await.unwrap(), Message::new(5, "pull"));

    session.stop().await;
    session.stop().await;
    assert!(session.is_closed());
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    server.shutdown().unwrap();
    assert!(matches!(
        server.get_session().await,
        Err(KinxError::ServerNotRunning)
    ));
}

#[tokio::test]
async fn test_oversized_frame_closes_session() {
    let config = local().with_max_payload_len(8);
    let (server, addr, task) = start(config, echo()).await;

    let mut client = KinxClient::connect(addr).await.unwrap();
    client.send(Message::new(1, "small")).await.unwrap();
    assert!(client.recv_timeout(WAIT).await.unwrap().is_some());

    // The unread payload may turn the close into a reset, so accept either.
    client.send(Message::new(2, "much too large")).await.unwrap();
    assert!(!matches!(client.recv_timeout(WAIT).await, Ok(Some(_))));
    eventually(|| server.session_count() == 0).await;
    stop(server, task).await;
}
