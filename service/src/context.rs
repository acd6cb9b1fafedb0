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

//! Per-session and per-message context values
//!
//! A [`SessionContext`] is produced by [`Handler::on_connect`](crate::Handler::on_connect)
//! and lives as long as the session. It is the application's place for
//! per-session state such as a display name, and it owns the cancellation token
//! that tears the session down.
//!
//! A [`HandlerContext`] is built for every decoded message and handed to
//! [`Handler::on_message`](crate::Handler::on_message) by value.

use crate::{Result, Session};
use dashmap::DashMap;
use kinx_codec::Message;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Value = Box<dyn Any + Send + Sync>;

/// Typed key-value store shared by every handler call of one session
///
/// Cloning is cheap and every clone sees the same values and the same
/// cancellation token.
#[derive(Clone, Default)]
pub struct SessionContext {
    values: Arc<DashMap<String, Value>>,
    cancel: CancellationToken,
}

impl SessionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty context cancelled together with `parent`
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            values: Arc::default(),
            cancel: parent.child_token(),
        }
    }

    /// Derive the context a session actually holds
    ///
    /// Values stay shared, but the token is a child: cancelling the returned
    /// context leaves `self` and its other sessions untouched, while
    /// cancelling `self` still reaches every derived context.
    pub(crate) fn for_session(&self) -> Self {
        Self {
            values: self.values.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Builder form of [`SessionContext::set`]
    pub fn with_value<T: Any + Send + Sync>(self, key: impl Into<String>, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Store a value, replacing any previous value under the same key
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Get a copy of a value
    ///
    /// Returns `None` if the key is missing or holds a different type.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| v.value().downcast_ref::<T>().cloned())
    }

    /// Remove a value, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Check if a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no values are stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The session's cancellation token
    ///
    /// Cancelling it stops the session.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check if the session has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the session is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        f.debug_struct("SessionContext")
            .field("keys", &keys)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Everything a message callback needs
///
/// Owns the received message so the handler can modify and echo it, and
/// carries a scratch store that lives only for this one call.
pub struct HandlerContext {
    session: Arc<Session>,
    message: Message,
    scratch: HashMap<String, Value>,
}

impl HandlerContext {
    /// Create a context for one received message
    pub fn new(session: Arc<Session>, message: Message) -> Self {
        Self {
            session,
            message,
            scratch: HashMap::new(),
        }
    }

    /// The session the message arrived on
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The session's long-lived context
    pub fn context(&self) -> &SessionContext {
        self.session.context()
    }

    /// The received message
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Mutable access to the received message
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Take the message out of the context
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Store a value for the rest of this call
    pub fn put<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.scratch.insert(key.into(), Box::new(value));
    }

    /// Borrow a value stored with [`HandlerContext::put`]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.scratch.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Write the (possibly modified) message straight back to the peer
    pub async fn reply(&self) -> Result<()> {
        self.session.write(&self.message).await
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("session_id", &self.session.id())
            .field("message", &self.message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Nickname(String);

    #[test]
    fn test_typed_values() {
        let ctx = SessionContext::new().with_value("name", Nickname("ada".into()));
        ctx.set("visits", 3u32);

        assert_eq!(ctx.get::<Nickname>("name"), Some(Nickname("ada".into())));
        assert_eq!(ctx.get::<u32>("visits"), Some(3));
        assert_eq!(ctx.get::<u64>("visits"), None);
        assert_eq!(ctx.get::<u32>("missing"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_clones_share_values() {
        let ctx = SessionContext::new();
        let clone = ctx.clone();

        clone.set("k", "v".to_string());
        assert!(ctx.contains("k"));
        assert!(ctx.remove("k"));
        assert!(!clone.contains("k"));
        assert!(clone.is_empty());
    }

    #[test]
    fn test_child_cancellation() {
        let parent = CancellationToken::new();
        let ctx = SessionContext::child_of(&parent);
        assert!(!ctx.is_cancelled());

        parent.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_session_context_cancels_alone() {
        let shared = SessionContext::new().with_value("room", 7u32);
        let first = shared.for_session();
        let second = shared.for_session();

        first.cancellation_token().cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!shared.is_cancelled());
        assert_eq!(second.get::<u32>("room"), Some(7));

        shared.cancellation_token().cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_debug_lists_keys() {
        let ctx = SessionContext::new().with_value("b", 1).with_value("a", 2);
        let debug = format!("{ctx:?}");
        assert!(debug.contains("[\"a\", \"b\"]"));
    }
}
