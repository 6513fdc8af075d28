// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Worker-core polling loop.
//!
//! One instance runs on every worker core (one OS thread per core on the host
//! platform). The worker owns nothing but its handshake cell: it waits for
//! the scheduler's bring-up signal, acks, then polls the doorbell and
//! dispatches whatever task record the scheduler published. Dispatch is a
//! function-pointer call through the task's kernel entry point; argument
//! dereferencing is the kernel's own concern.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    graph::{
        Task,
        TaskArg,
    },
    handshake::HandshakeCell,
};
use ::core::mem;
use ::std::thread;

//======================================================================================================================
// Types
//======================================================================================================================

/// Unified kernel signature: every compiled kernel takes its task's argument
/// descriptors and nothing else. This is the type the worker casts
/// `function_bin_addr` to.
pub type KernelFn = unsafe extern "C" fn(args: *const TaskArg, num_args: i32);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Worker-core entry point.
///
/// The worker never writes `task`, `control`, `core_kind` or `aicpu_ready`,
/// and never rings the doorbell; it only clears the doorbell after completing
/// the kernel it found there. A kernel that panics takes its core down; the
/// protocol does not recover.
pub fn worker_main(cell: &HandshakeCell, core_index: usize) {
    cell.wait_aicpu_ready();
    cell.ack(core_index as u32);
    trace!("worker_main(): core {} checked in", core_index);

    loop {
        if cell.quit_requested() {
            break;
        }

        if let Some(task_addr) = cell.fetch_task() {
            // The scheduler publishes task addresses computed from the staged
            // graph base, so the address is valid for the whole execution.
            let task: &Task = unsafe { &*(task_addr as *const Task) };
            trace!("worker_main(): core {} runs task {}", core_index, task.task_id());
            dispatch(task);
            cell.complete_task();
        }

        // Spin-wait; on the host platform the poll interval is one scheduling
        // quantum rather than a cache refill.
        thread::yield_now();
    }

    trace!("worker_main(): core {} exits", core_index);
}

/// Dispatches a task through its kernel entry point. A task with no bound
/// entry point is skipped, but its completion is still signaled by the
/// caller.
fn dispatch(task: &Task) {
    let bin_addr: u64 = task.function_bin_addr();
    if bin_addr == 0 {
        warn!("dispatch(): task {} has no kernel bound", task.task_id());
        return;
    }

    let kernel: KernelFn = unsafe { mem::transmute::<usize, KernelFn>(bin_addr as usize) };
    let args: &[TaskArg] = task.args();
    unsafe { kernel(args.as_ptr(), args.len() as i32) };
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
