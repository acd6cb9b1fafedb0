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

//! The unit exchanged between framing and handlers

use crate::packer::HEADER_LEN;
use bytes::Bytes;
use std::fmt;

/// A framed application message
///
/// A message is a `{length, id, payload}` record. `length` is kept alongside the
/// payload because it is what travels on the wire; constructing a message or
/// replacing its payload keeps the two in sync, while [`Message::set_length`]
/// allows an explicit override that the packers will reject at pack time if it
/// disagrees with the payload.
///
/// # Example
///
/// ```
/// use kinx_codec::Message;
///
/// let mut message = Message::new(7, "ping");
/// assert_eq!(message.len(), 4);
///
/// message.set_payload("pong!");
/// assert_eq!(message.len(), 5);
/// assert_eq!(message.wire_len(), 21);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Message {
    length: u64,
    id: u64,
    payload: Bytes,
}

impl Message {
    /// Create a message with the given id and payload
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            length: payload.len() as u64,
            id,
            payload,
        }
    }

    /// Create a message with an empty payload
    pub fn empty(id: u64) -> Self {
        Self::new(id, Bytes::new())
    }

    /// Advertised payload length
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Check if the advertised payload length is zero
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Message id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Message payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total number of bytes this message occupies on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Replace the message id
    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Override the advertised length without touching the payload
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    /// Replace the payload, updating the advertised length to match
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.length = self.payload.len() as u64;
    }

    /// Check whether the advertised length agrees with the payload
    pub fn is_consistent(&self) -> bool {
        self.length == self.payload.len() as u64
    }

    /// Consume the message, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("length", &self.length)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
