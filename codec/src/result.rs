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

//! Result Type for Codec Operations

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while packing or unpacking frames.
///
/// An incomplete frame is not an error: [`FramePacker`](crate::FramePacker)
/// reports it as `Ok(None)` so the caller can wait for more bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading from the underlying stream.
    ///
    /// A stream that ends part way through a frame surfaces here as
    /// [`std::io::ErrorKind::UnexpectedEof`].
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The advertised length of a message does not match its payload.
    #[error("advertised length {declared} does not match payload of {actual} bytes")]
    LengthMismatch {
        /// Length carried in the message header
        declared: u64,
        /// Actual payload size
        actual: usize,
    },

    /// The advertised payload length exceeds the configured limit.
    #[error("payload of {length} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Length carried in the frame header
        length: u64,
        /// Configured maximum
        max: u64,
    },
}

impl CodecError {
    /// Check if the error was caused by the stream ending
    pub fn is_eof(&self) -> bool {
        matches!(self, CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
