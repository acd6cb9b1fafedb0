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

//! Peek-based unpacking over an accumulating buffer

use crate::packer::{check_payload_len, encode_frame, parse_header, peek_length};
use crate::{CodecError, CodecResult, DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, Message, Packer};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Packer that decodes from bytes already received
///
/// The length field is peeked without consuming anything. Until the header and
/// the advertised payload are all buffered, [`FramePacker::unpack`] returns
/// `Ok(None)` and leaves the buffer untouched, so message boundaries survive
/// arbitrary TCP fragmentation. Once a full frame is present it is consumed in
/// one step.
#[derive(Debug, Clone, Copy)]
pub struct FramePacker {
    max_payload_len: u64,
}

impl Default for FramePacker {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePacker {
    /// Create a packer with the default payload limit
    pub fn new() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    /// Set the largest payload accepted or produced
    pub fn with_max_payload_len(mut self, max: u64) -> Self {
        self.max_payload_len = max;
        self
    }

    /// Try to take one complete message off the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed; nothing is consumed in
    /// that case.
    pub fn unpack(&self, src: &mut BytesMut) -> CodecResult<Option<Message>> {
        let Some(length) = peek_length(src) else {
            return Ok(None);
        };
        check_payload_len(length, self.max_payload_len)?;

        let frame_len = usize::try_from(length)
            .ok()
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or(CodecError::PayloadTooLarge {
                length,
                max: self.max_payload_len,
            })?;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let header = src.split_to(HEADER_LEN);
        let (_, id) = parse_header(&header);
        let payload = src.split_to(frame_len - HEADER_LEN).freeze();

        trace!(id, length, "Unpacked message");
        Ok(Some(Message::new(id, payload)))
    }
}

impl Packer for FramePacker {
    fn max_payload_len(&self) -> u64 {
        self.max_payload_len
    }
}

impl Decoder for FramePacker {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        self.unpack(src)
    }
}

impl Encoder<Message> for FramePacker {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Message>>::encode(self, &item, dst)
    }
}

impl Encoder<&Message> for FramePacker {
    type Error = CodecError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        check_payload_len(item.len(), self.max_payload_len)?;
        encode_frame(item, dst)
    }
}
