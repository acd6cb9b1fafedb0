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

//! Kinx Message Framing
//!
//! Every message travels over the byte stream as a fixed 16 byte header followed
//! by the payload:
//!
//! ```text
//! offset 0..7   : payload length, 8 bytes, big-endian unsigned
//! offset 8..15  : message id,     8 bytes, big-endian unsigned
//! offset 16..   : payload,        `length` bytes
//! ```
//!
//! There is no magic number, version byte or checksum. Two decoding strategies
//! share this wire format:
//!
//! - [`StreamPacker`] reads a whole frame from an [`AsyncRead`](tokio::io::AsyncRead),
//!   suspending until the header and payload are complete.
//! - [`FramePacker`] inspects an accumulating [`BytesMut`](bytes::BytesMut) without
//!   consuming it until a full frame is buffered, reporting `Ok(None)` otherwise.
//!   It implements the `tokio_util` [`Decoder`](tokio_util::codec::Decoder) and
//!   [`Encoder`](tokio_util::codec::Encoder) traits so it plugs into `Framed`.
//!
//! Both produce byte-identical output for the same [`Message`].
//!
//! # Example
//!
//! ```
//! use kinx_codec::{FramePacker, Message, Packer};
//! use bytes::BytesMut;
//!
//! let packer = FramePacker::new();
//! let wire = packer.pack(&Message::new(1001, "hello")).unwrap();
//!
//! let mut buffer = BytesMut::from(&wire[..]);
//! let decoded = packer.unpack(&mut buffer).unwrap().unwrap();
//! assert_eq!(decoded.id(), 1001);
//! assert_eq!(decoded.payload().as_ref(), b"hello");
//! ```

mod frame;
mod message;
mod packer;
mod result;
mod stream;

pub use frame::FramePacker;
pub use message::Message;
pub use packer::{
    DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, ID_FIELD_LEN, LENGTH_FIELD_LEN, Packer, encode_frame,
};
pub use result::{CodecError, CodecResult};
pub use stream::StreamPacker;
