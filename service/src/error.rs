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

//! Error types for the kinx session service

use kinx_codec::CodecError;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, KinxError>;

/// Session service error types
#[derive(Debug, Error)]
pub enum KinxError {
    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error from the packer
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// No frame started arriving within the read timeout
    #[error("Operation timed out")]
    Timeout,

    /// The session has been stopped
    #[error("Session closed")]
    SessionClosed,

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Not enough worker capacity to admit a session
    #[error("Server busy: {free} free workers, {required} required")]
    ServerBusy {
        /// Workers available at the time of the check
        free: usize,
        /// Workers the session would need
        required: usize,
    },

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// A message handler asked for the session to end
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl KinxError {
    /// Create a handler error from any displayable value
    pub fn handler(message: impl std::fmt::Display) -> Self {
        KinxError::Handler(message.to_string())
    }

    /// Check if the error is a read timeout
    ///
    /// A timeout while waiting for the next frame is not fatal; the reader
    /// simply polls again.
    pub fn is_timeout(&self) -> bool {
        matches!(self, KinxError::Timeout)
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those where retrying the operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, KinxError::Timeout | KinxError::ServerBusy { .. })
    }

    /// Check if the error ends the session it occurred on
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KinxError::Io(_)
                | KinxError::Codec(_)
                | KinxError::SessionClosed
                | KinxError::ConnectionClosed
                | KinxError::Handler(_)
        )
    }
}
