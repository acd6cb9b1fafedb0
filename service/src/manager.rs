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

//! Session registry
//!
//! The SessionManager tracks every session started by the accept loop, from
//! admission until its reader role exits, and fans messages out to all of
//! them.

use crate::{Session, SessionId, SessionInfo};
use dashmap::DashMap;
use kinx_codec::Message;
use std::sync::Arc;

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Number of sessions attempted
    pub total: usize,
    /// Number of messages queued
    pub succeeded: usize,
    /// Number of sessions that were already closed
    pub failed: usize,
    /// Errors that occurred (SessionId and error message)
    pub errors: Vec<(SessionId, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// Registry of live sessions
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Get all session IDs
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Get all session infos
    pub fn infos(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Get the number of tracked sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no sessions are tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queue a message on every session
    ///
    /// Sends run concurrently, each waiting for room in its own session's
    /// outbound queue.
    pub async fn broadcast(&self, message: &Message) -> BroadcastResult {
        self.broadcast_filtered(message, |_| true).await
    }

    /// Queue a message on the sessions matching a filter
    pub async fn broadcast_filtered<F>(&self, message: &Message, filter: F) -> BroadcastResult
    where
        F: Fn(&SessionInfo) -> bool,
    {
        // Collect first so no map shard stays locked across an await.
        let targets: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| filter(&entry.value().info()))
            .map(|entry| entry.value().clone())
            .collect();

        let mut result = BroadcastResult {
            total: targets.len(),
            ..Default::default()
        };

        let sends = targets.into_iter().map(|session| {
            let message = message.clone();
            async move { (session.id(), session.send(message).await) }
        });
        for (id, res) in futures::future::join_all(sends).await {
            match res {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }

        result
    }
}
