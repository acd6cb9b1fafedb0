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

//! Buffered-stream unpacking

use crate::packer::{check_payload_len, parse_header};
use crate::{CodecError, CodecResult, DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, Message, Packer};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Initial payload buffer size; larger payloads grow as they are read
const READ_CHUNK_LEN: usize = 64 * 1024;

/// Packer that reads whole frames straight from a stream
///
/// [`StreamPacker::unpack`] suspends until the 16 byte header and the full
/// payload have been read. A stream that fails or ends before the frame is
/// complete surfaces as an I/O error; nothing is buffered across calls, so the
/// caller must not abandon an `unpack` part way through a frame.
#[derive(Debug, Clone, Copy)]
pub struct StreamPacker {
    max_payload_len: u64,
}

impl Default for StreamPacker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamPacker {
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

    /// Read exactly one message from `reader`
    pub async fn unpack<R>(&self, reader: &mut R) -> CodecResult<Message>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let (length, id) = parse_header(&header);
        check_payload_len(length, self.max_payload_len)?;

        let size = usize::try_from(length).map_err(|_| CodecError::PayloadTooLarge {
            length,
            max: self.max_payload_len,
        })?;
        // Grow with the bytes that actually arrive rather than trusting the
        // advertised length up front.
        let mut payload = Vec::with_capacity(size.min(READ_CHUNK_LEN));
        (&mut *reader).take(length).read_to_end(&mut payload).await?;
        if payload.len() != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended before the payload was complete",
            )
            .into());
        }

        trace!(id, length, "Unpacked message");
        Ok(Message::new(id, payload))
    }
}

impl Packer for StreamPacker {
    fn max_payload_len(&self) -> u64 {
        self.max_payload_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unpack_from_slice() {
        let packer = StreamPacker::new();
        let frame = packer.pack(&Message::new(1001, "hello")).unwrap();

        let mut reader: &[u8] = &frame;
        let message = packer.unpack(&mut reader).await.unwrap();
        assert_eq!(message.id(), 1001);
        assert_eq!(message.payload().as_ref(), b"hello");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_short_header_is_eof() {
        let packer = StreamPacker::new();
        let mut reader: &[u8] = &[0, 0, 0, 0, 0, 0, 0, 1, 0, 0];
        let err = packer.unpack(&mut reader).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_short_payload_is_eof() {
        let packer = StreamPacker::new();
        let frame = packer.pack(&Message::new(9, "truncated")).unwrap();

        let mut reader: &[u8] = &frame[..frame.len() - 3];
        let err = packer.unpack(&mut reader).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_large_payload_arrives_in_pieces() {
        let packer = StreamPacker::new();
        let message = Message::new(4, vec![0x5a; READ_CHUNK_LEN * 3 + 17]);
        let frame = packer.pack(&message).unwrap();

        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in frame.chunks(4096) {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let decoded = packer.unpack(&mut rx).await.unwrap();
        writer.await.unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_header_only_frame_is_eof() {
        let packer = StreamPacker::new();
        let mut frame = [0u8; HEADER_LEN + 3];
        frame[..8].copy_from_slice(&(8u64 * 1024 * 1024).to_be_bytes());

        let mut reader: &[u8] = &frame;
        let err = packer.unpack(&mut reader).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_limit_enforced_before_allocation() {
        let packer = StreamPacker::new().with_max_payload_len(4);
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(&u64::MAX.to_be_bytes());

        let mut reader: &[u8] = &header;
        let err = packer.unpack(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge { max: 4, .. }));
    }
}
