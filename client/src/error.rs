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
//! Client error types

use kinx_codec::CodecError;
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame from the server
    #[error("Codec error: {0}")]
    Codec(CodecError),

    /// Connection closed by server
    #[error("Connection closed by server")]
    Closed,

    /// No message arrived in time
    #[error("Read timeout")]
    Timeout,
}

impl From<CodecError> for ClientError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(e) => Self::Io(e),
            other => Self::Codec(other),
        }
    }
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
