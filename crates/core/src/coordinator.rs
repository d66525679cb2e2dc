//! Arbitrates access to the shared inference runtime.
//!
//! Two primitives are handed out:
//!
//! - [`LoadLock`]: one in-flight model load per model type. Locks are created
//!   lazily per key and removed from the table once nobody holds or waits on
//!   them.
//! - [`InferenceSlot`]: a permit from a fair (FIFO) semaphore sized to the
//!   concurrency ceiling. Callers that cannot get a permit immediately join a
//!   bounded wait queue; once the queue is at capacity further callers are
//!   rejected with `QUEUE_FULL` instead of waiting.
//!
//! Both handles release on drop, so a cancelled or aborted caller never leaks
//! a permit.

use crate::config::CoordinatorConfig;
use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

fn table_guard(table: &LockTable) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    // The table holds no invariants a panicking holder could break.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub active_inference: usize,
    pub queued_inference: usize,
    pub max_concurrent_inference: usize,
    pub max_queue_size: usize,
    pub load_locks: usize,
}

pub struct AccessCoordinator {
    load_locks: LockTable,
    inference: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_concurrent: usize,
    max_queue: usize,
}

impl AccessCoordinator {
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            load_locks: Arc::new(Mutex::new(HashMap::new())),
            inference: Arc::new(Semaphore::new(max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            max_queue,
        }
    }

    pub fn from_config(cfg: &CoordinatorConfig) -> Self {
        Self::new(cfg.max_concurrent_inference, cfg.max_queue_size)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Waits (FIFO, no timeout) for exclusive load rights on `model_type`.
    pub async fn acquire_load_lock(&self, model_type: &str) -> LoadLock {
        let mutex = {
            let mut table = table_guard(&self.load_locks);
            Arc::clone(
                table
                    .entry(model_type.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let started = Instant::now();
        let guard = mutex.lock_owned().await;
        debug!(
            model_type,
            waited_ms = started.elapsed().as_millis() as u64,
            "load lock acquired"
        );
        LoadLock {
            model_type: model_type.to_string(),
            guard: Some(guard),
            table: Arc::clone(&self.load_locks),
        }
    }

    /// Takes an inference permit, queueing FIFO behind earlier callers.
    ///
    /// Fails immediately with [`CoreError::QueueFull`] when the wait queue is
    /// already at capacity.
    pub async fn acquire_inference_slot(&self, request_id: &str) -> CoreResult<InferenceSlot> {
        if let Ok(permit) = Arc::clone(&self.inference).try_acquire_owned() {
            return Ok(InferenceSlot::new(request_id, permit));
        }

        let max_queue = self.max_queue;
        let reserved = self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_queue).then_some(n + 1)
            });
        if reserved.is_err() {
            warn!(request_id, capacity = max_queue, "inference queue full");
            return Err(CoreError::QueueFull {
                capacity: max_queue,
            });
        }

        let _ticket = QueueTicket(Arc::clone(&self.waiting));
        let started = Instant::now();
        let permit = Arc::clone(&self.inference)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::ShutDown)?;
        debug!(
            request_id,
            waited_ms = started.elapsed().as_millis() as u64,
            "inference slot acquired after queueing"
        );
        Ok(InferenceSlot::new(request_id, permit))
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            active_inference: self.max_concurrent - self.inference.available_permits(),
            queued_inference: self.waiting.load(Ordering::SeqCst),
            max_concurrent_inference: self.max_concurrent,
            max_queue_size: self.max_queue,
            load_locks: table_guard(&self.load_locks).len(),
        }
    }
}

/// Holds a place in the wait queue; leaving the queue (acquired or cancelled) frees it.
struct QueueTicket(Arc<AtomicUsize>);

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive load rights for one model type. Released on drop.
pub struct LoadLock {
    model_type: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl LoadLock {
    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn release(self) {}
}

impl Drop for LoadLock {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mutex = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);

        let mut table = table_guard(&self.table);
        // Table entry plus our clone: no other holder or waiter.
        if Arc::strong_count(&mutex) == 2
            && table
                .get(&self.model_type)
                .is_some_and(|existing| Arc::ptr_eq(existing, &mutex))
        {
            table.remove(&self.model_type);
        }
        debug!(model_type = %self.model_type, "load lock released");
    }
}

/// One inference permit. Released on drop.
pub struct InferenceSlot {
    request_id: String,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl InferenceSlot {
    fn new(request_id: &str, permit: OwnedSemaphorePermit) -> Self {
        Self {
            request_id: request_id.to_string(),
            acquired_at: Instant::now(),
            _permit: permit,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(self) {}
}

impl Drop for InferenceSlot {
    fn drop(&mut self) {
        debug!(
            request_id = %self.request_id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "inference slot released"
        );
    }
}
