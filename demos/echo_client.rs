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
//! Echo Client Example
//!
//! Sends a few messages to a running `echo_server` and prints the replies.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p kinx-client --example echo_client -- 127.0.0.1:9780
//! ```

use kinx_client::{KinxClient, Message};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9780".to_string());
    let mut client = KinxClient::connect_timeout(addr.as_str(), Duration::from_secs(5)).await?;
    println!("Connected to {}", client.peer_addr());

    for (id, text) in [(1001u64, "hello"), (1002, "kinx"), (1003, "")] {
        client.send(Message::new(id, text)).await?;
        match client.recv_timeout(Duration::from_secs(5)).await? {
            Some(reply) => println!(
                "id={} payload={:?}",
                reply.id(),
                String::from_utf8_lossy(reply.payload())
            ),
            None => {
                println!("Server closed the connection");
                return Ok(());
            }
        }
    }

    client.close().await?;
    Ok(())
}
