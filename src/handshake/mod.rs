// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Shared-memory mailboxes between scheduler threads and worker cores.
//!
//! Each worker core owns one cache-line-aligned cell. The cell is the single
//! point of synchronization between that core and the one scheduler thread
//! that manages it. All cross-unit publication follows a fixed order: payload
//! fields are written first and the doorbell field (`task_status`) is written
//! last with release semantics, so a reader that observes the doorbell with
//! acquire semantics also observes the payload. On hardware without a
//! coherence fabric the acquire side additionally invalidates the cell's
//! cache line; on cache-coherent hosts the fences alone are sufficient.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::graph::CoreKind;
use ::core::{
    hint,
    slice,
    sync::atomic::{
        AtomicU32,
        AtomicU64,
        Ordering,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Doorbell value: the cell holds no work and the worker is idle.
const TASK_IDLE: u32 = 0;

/// Doorbell value: a task has been published and the worker owns it.
const TASK_BUSY: u32 = 1;

/// Control value: keep executing.
const CONTROL_EXECUTE: u32 = 0;

/// Control value: exit the worker loop.
const CONTROL_QUIT: u32 = 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handshake cell: one mailbox per worker core.
///
/// The cell is padded to a full cache line to prevent false sharing between
/// adjacent cores. The scheduler writes `aicpu_ready`, `task`, `control` and
/// the busy side of `task_status`; the worker writes `aicore_done` and the
/// idle side of `task_status`; nothing else ever writes the cell.
#[repr(C, align(64))]
pub struct HandshakeCell {
    /// Scheduler-to-worker bring-up flag.
    aicpu_ready: AtomicU32,
    /// Worker-to-scheduler bring-up ack. Stores `core_index + 1`, so zero
    /// means "not yet".
    aicore_done: AtomicU32,
    /// Device address of the task record. Zero means idle-empty.
    task: AtomicU64,
    /// The authoritative doorbell: 0 = idle/complete, 1 = busy.
    task_status: AtomicU32,
    /// Control flag: 0 = execute, 1 = quit.
    control: AtomicU32,
    /// Kind of the owning core: 0 = Cube, 1 = Vector.
    core_kind: AtomicU32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for handshake cells.
impl HandshakeCell {
    //==================================================================================================================
    // Host Side
    //==================================================================================================================

    /// Resets the target cell for a fresh execution. Called by the host
    /// before any kernel is launched, so no ordering is required beyond the
    /// launch itself.
    pub fn reset(&self, core_kind: CoreKind) {
        self.aicpu_ready.store(0, Ordering::Relaxed);
        self.aicore_done.store(0, Ordering::Relaxed);
        self.task.store(0, Ordering::Relaxed);
        self.task_status.store(TASK_IDLE, Ordering::Relaxed);
        self.control.store(CONTROL_EXECUTE, Ordering::Relaxed);
        self.core_kind.store(core_kind as i32 as u32, Ordering::Relaxed);
    }

    //==================================================================================================================
    // Scheduler Side
    //==================================================================================================================

    /// Signals the worker that the scheduler is up.
    pub fn signal_ready(&self) {
        self.aicpu_ready.store(1, Ordering::Release);
    }

    /// Polls the worker's bring-up ack. Zero means the worker has not checked
    /// in yet; otherwise the value is `core_index + 1`.
    pub fn poll_ack(&self) -> u32 {
        self.aicore_done.load(Ordering::Acquire)
    }

    /// Checks whether the target cell is idle and empty, i.e. available for
    /// dispatch.
    pub fn is_idle(&self) -> bool {
        self.task_status.load(Ordering::Acquire) == TASK_IDLE && self.task.load(Ordering::Relaxed) == 0
    }

    /// Publishes a task to the worker. The task address is written first; the
    /// doorbell write carries release semantics so the worker's acquire read
    /// of the doorbell also observes the address.
    pub fn publish(&self, task_addr: u64) {
        self.task.store(task_addr, Ordering::Relaxed);
        self.task_status.store(TASK_BUSY, Ordering::Release);
    }

    /// Checks the target cell for a completed task. A completion is the
    /// conjunction of an idle doorbell and a non-zero task address; the
    /// acquire read of the doorbell makes the worker's writes visible.
    pub fn take_completion(&self) -> Option<u64> {
        if self.task_status.load(Ordering::Acquire) != TASK_IDLE {
            return None;
        }

        let task_addr: u64 = self.task.load(Ordering::Relaxed);
        if task_addr == 0 {
            return None;
        }

        Some(task_addr)
    }

    /// Clears the task address after a completion has been processed, making
    /// the cell available for dispatch again.
    pub fn retire_task(&self) {
        self.task.store(0, Ordering::Release);
    }

    /// Signals the worker to exit its loop.
    pub fn request_quit(&self) {
        self.control.store(CONTROL_QUIT, Ordering::Release);
    }

    /// Returns the kind of the owning core.
    pub fn core_kind(&self) -> CoreKind {
        match self.core_kind.load(Ordering::Relaxed) {
            1 => CoreKind::Vector,
            _ => CoreKind::Cube,
        }
    }

    /// Reads the control flag, for post-execution diagnostics.
    pub fn control(&self) -> u32 {
        self.control.load(Ordering::Acquire)
    }

    /// Reads the doorbell, for post-execution diagnostics.
    pub fn task_status(&self) -> u32 {
        self.task_status.load(Ordering::Acquire)
    }

    /// Reads the task address, for post-execution diagnostics.
    pub fn task_addr(&self) -> u64 {
        self.task.load(Ordering::Acquire)
    }

    //==================================================================================================================
    // Worker Side
    //==================================================================================================================

    /// Spins until the scheduler signals bring-up.
    pub fn wait_aicpu_ready(&self) {
        while self.aicpu_ready.load(Ordering::Acquire) == 0 {
            hint::spin_loop();
            ::std::thread::yield_now();
        }
    }

    /// Acknowledges bring-up. Stores `core_index + 1` so the scheduler can
    /// distinguish "not yet" from core zero.
    pub fn ack(&self, core_index: u32) {
        self.aicore_done.store(core_index + 1, Ordering::Release);
    }

    /// Checks whether the scheduler has requested shutdown.
    pub fn quit_requested(&self) -> bool {
        self.control.load(Ordering::Acquire) == CONTROL_QUIT
    }

    /// Checks the doorbell for published work and returns the task address.
    /// The worker only dispatches on a rung doorbell; a non-zero `task` left
    /// behind after a completion is never re-executed.
    pub fn fetch_task(&self) -> Option<u64> {
        if self.task_status.load(Ordering::Acquire) != TASK_BUSY {
            return None;
        }

        let task_addr: u64 = self.task.load(Ordering::Relaxed);
        if task_addr == 0 {
            return None;
        }

        Some(task_addr)
    }

    /// Signals that the published task has finished executing. The task
    /// address is left in place so the scheduler can see which task
    /// completed; the release write publishes all of the kernel's writes.
    pub fn complete_task(&self) {
        self.task_status.store(TASK_IDLE, Ordering::Release);
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Views a handshake array staged in device memory.
///
/// # Safety
///
/// `addr` must be the base address of a live, 64-byte-aligned array of at
/// least `len` handshake cells that outlives the returned slice.
pub unsafe fn cells_from_addr<'a>(addr: u64, len: usize) -> &'a [HandshakeCell] {
    slice::from_raw_parts(addr as *const HandshakeCell, len)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
