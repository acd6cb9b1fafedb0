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
//! # Kinx Client
//!
//! A small framed client for servers built with `kinx-service`. Messages are
//! encoded and decoded with [`kinx_codec::FramePacker`], so frames split across
//! TCP segments are reassembled before they are returned.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kinx_client::{KinxClient, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = KinxClient::connect("127.0.0.1:9780").await?;
//!     client.send(Message::new(1001, "hello")).await?;
//!
//!     if let Some(reply) = client.recv().await? {
//!         println!("{} bytes back for id {}", reply.len(), reply.id());
//!     }
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod error;

pub use client::KinxClient;
pub use error::{ClientError, Result};

pub use kinx_codec::Message;
