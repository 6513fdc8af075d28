// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::arrayvec::ArrayVec;
use ::core::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use ::parking_lot::Mutex;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A bounded, mutex-protected LIFO of ready task identifiers.
///
/// There is one queue per core kind, shared by all scheduler threads. The
/// mutex serializes producers and consumers; the element count is mirrored in
/// an atomic so the dispatch fast path can check emptiness without taking the
/// lock. Stack order among ready tasks is a policy choice, not a correctness
/// constraint.
pub struct ReadyQueue {
    /// Task identifiers, top of stack last.
    slots: Mutex<ArrayVec<i32, { limits::MAX_TASKS }>>,
    /// Mirror of the slot count for the lock-free emptiness check.
    count: AtomicUsize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for ready queues.
impl ReadyQueue {
    /// Creates an empty ready queue.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(ArrayVec::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Pushes a task identifier onto the target queue. The slot is written
    /// under the lock, then the count is published with release semantics.
    pub fn push(&self, task_id: i32) -> Result<(), Fail> {
        let mut slots = self.slots.lock();

        // A task enters a ready queue at most once, so the queue can only
        // overflow if that invariant is broken elsewhere.
        if slots.try_push(task_id).is_err() {
            let cause: String = format!("ready queue overflow (task_id={})", task_id);
            error!("push(): {}", cause);
            return Err(Fail::new(libc::EFAULT, &cause));
        }

        self.count.store(slots.len(), Ordering::Release);

        Ok(())
    }

    /// Pops a task identifier from the target queue. The relaxed count read
    /// outside the critical section is only an emptiness hint; the pop itself
    /// re-checks under the lock.
    pub fn pop(&self) -> Option<i32> {
        if self.count.load(Ordering::Relaxed) == 0 {
            return None;
        }

        let mut slots = self.slots.lock();
        let task_id: Option<i32> = slots.pop();
        self.count.store(slots.len(), Ordering::Release);

        task_id
    }

    /// Returns the number of queued task identifiers.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Checks whether the target queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all queued task identifiers.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.clear();
        self.count.store(0, Ordering::Release);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default trait implementation.
impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
