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
//! Framed TCP client

use crate::{ClientError, Result};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use kinx_codec::{FramePacker, Message};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

/// Client connection to a kinx server
#[derive(Debug)]
pub struct KinxClient {
    framed: Framed<TcpStream, FramePacker>,
    peer_addr: SocketAddr,
}

impl KinxClient {
    /// Connect to a server
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Connect to a server, giving up after `limit`
    pub async fn connect_timeout(addr: impl ToSocketAddrs, limit: Duration) -> Result<Self> {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(stream) => Self::from_stream(stream?),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        Self::with_packer(stream, FramePacker::new())
    }

    /// Wrap a stream using a specific packer, e.g. one with a custom payload limit
    pub fn with_packer(stream: TcpStream, packer: FramePacker) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        debug!(peer_addr = %peer_addr, "Connected");
        Ok(Self {
            framed: Framed::new(stream, packer),
            peer_addr,
        })
    }

    /// Address of the server
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send one message and flush it
    pub async fn send(&mut self, message: Message) -> Result<()> {
        trace!(message_id = message.id(), length = message.len(), "Sending message");
        self.framed.send(message).await?;
        Ok(())
    }

    /// Receive the next message
    ///
    /// Returns `None` once the server has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match self.framed.next().await {
            Some(Ok(message)) => {
                trace!(message_id = message.id(), length = message.len(), "Received message");
                Ok(Some(message))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Receive the next message, waiting at most `limit`
    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<Option<Message>> {
        timeout(limit, self.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Receive the next message, treating a closed connection as an error
    pub async fn expect(&mut self) -> Result<Message> {
        self.recv().await?.ok_or(ClientError::Closed)
    }

    /// Flush pending output and shut down the write side
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<Message>::close(&mut self.framed).await?;
        debug!(peer_addr = %self.peer_addr, "Closed");
        Ok(())
    }

    /// Take back the stream along with any bytes read but not yet decoded
    pub fn into_inner(self) -> (TcpStream, BytesMut) {
        let parts = self.framed.into_parts();
        (parts.io, parts.read_buf)
    }
}
