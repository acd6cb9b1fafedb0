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

//! Wire layout shared by every packer

use crate::{CodecError, CodecResult, Message};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the big-endian payload length field
pub const LENGTH_FIELD_LEN: usize = 8;

/// Size of the big-endian message id field
pub const ID_FIELD_LEN: usize = 8;

/// Size of the complete frame header
pub const HEADER_LEN: usize = LENGTH_FIELD_LEN + ID_FIELD_LEN;

/// Default upper bound on an advertised payload length (16 MiB)
pub const DEFAULT_MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

/// Converts messages to their wire representation.
///
/// Packing is identical for every strategy, so the trait only asks for the
/// payload limit; how frames are read back is specific to each implementation.
pub trait Packer: Send + Sync {
    /// Largest payload this packer will produce or accept
    fn max_payload_len(&self) -> u64;

    /// Pack a message into a freshly allocated frame
    fn pack(&self, message: &Message) -> CodecResult<Bytes> {
        check_payload_len(message.len(), self.max_payload_len())?;
        let mut frame = BytesMut::with_capacity(message.wire_len());
        encode_frame(message, &mut frame)?;
        Ok(frame.freeze())
    }
}

/// Append the wire representation of `message` to `dst`
///
/// Fails only when the advertised length disagrees with the payload.
pub fn encode_frame(message: &Message, dst: &mut BytesMut) -> CodecResult<()> {
    if !message.is_consistent() {
        return Err(CodecError::LengthMismatch {
            declared: message.len(),
            actual: message.payload().len(),
        });
    }
    dst.reserve(message.wire_len());
    dst.put_u64(message.len());
    dst.put_u64(message.id());
    dst.put_slice(message.payload());
    Ok(())
}

/// Split a header into `(length, id)`
///
/// `header` must hold at least [`HEADER_LEN`] bytes.
pub(crate) fn parse_header(header: &[u8]) -> (u64, u64) {
    let length = BigEndian::read_u64(&header[..LENGTH_FIELD_LEN]);
    let id = BigEndian::read_u64(&header[LENGTH_FIELD_LEN..HEADER_LEN]);
    (length, id)
}

/// Peek the advertised payload length from the start of a buffer
pub(crate) fn peek_length(buf: &[u8]) -> Option<u64> {
    if buf.len() < LENGTH_FIELD_LEN {
        return None;
    }
    Some(BigEndian::read_u64(&buf[..LENGTH_FIELD_LEN]))
}

pub(crate) fn check_payload_len(length: u64, max: u64) -> CodecResult<()> {
    if length > max {
        return Err(CodecError::PayloadTooLarge { length, max });
    }
    Ok(())
}
