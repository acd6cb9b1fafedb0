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

//! Bounded task executor used for admission control
//!
//! Every session role runs as a task holding one permit of a shared
//! [`Semaphore`]. The pool never queues: when no permit is free a submission
//! is refused immediately, which is what lets the accept loop turn excess
//! connections away instead of stalling.

use crate::{KinxError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Bounded pool of concurrently running tasks
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Create a pool allowing `capacity` tasks at once
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Maximum number of concurrent tasks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks that could start right now
    pub fn free(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.capacity.saturating_sub(self.free())
    }

    /// Run a single task if a slot is free
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| KinxError::ServerBusy {
                free: self.free(),
                required: 1,
            })?;
        Ok(tokio::spawn(async move {
            let output = task.await;
            drop(permit);
            output
        }))
    }

    /// Reserve `count` slots at once, or none at all
    pub fn try_reserve(&self, count: usize) -> Result<Reservation> {
        let busy = || KinxError::ServerBusy {
            free: self.free(),
            required: count,
        };
        let count = u32::try_from(count).map_err(|_| busy())?;
        let permit = self
            .permits
            .clone()
            .try_acquire_many_owned(count)
            .map_err(|_| busy())?;
        Ok(Reservation {
            permit: Some(permit),
        })
    }
}

/// Slots held for the tasks of one session
///
/// Each call to [`Reservation::spawn`] moves one slot into the new task, which
/// releases it when the task finishes. Slots never spawned are released when
/// the reservation is dropped.
#[derive(Debug)]
pub struct Reservation {
    permit: Option<OwnedSemaphorePermit>,
}

impl Reservation {
    /// Slots still held
    pub fn remaining(&self) -> usize {
        self.permit.as_ref().map_or(0, |p| p.num_permits())
    }

    /// Spawn a task on one reserved slot
    ///
    /// Returns `None` once every slot has been used.
    pub fn spawn<F>(&mut self, task: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let slot = match self.permit.as_mut()?.num_permits() {
            0 => return None,
            1 => self.permit.take()?,
            _ => self.permit.as_mut()?.split(1)?,
        };
        Some(tokio::spawn(async move {
            let output = task.await;
            drop(slot);
            output
        }))
    }
}
