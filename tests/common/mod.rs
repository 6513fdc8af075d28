// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::npurt::{
    Config,
    CoreKind,
    NpuRuntime,
    TaskArg,
    TaskGraph,
};
use ::std::{
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
    thread,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Function id registered for the Cube recording kernel.
pub const FUNC_CUBE: i32 = 0;

/// Function id registered for the Vector recording kernel.
pub const FUNC_VECTOR: i32 = 1;

/// Capacity of the execution log.
const LOG_CAPACITY: usize = 256;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A completion record: which task ran, and on which worker core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub task_id: i32,
    pub core_index: usize,
}

/// Shared log filled by the recording kernel. Entries are claimed with an
/// atomic cursor, so the entry order is the global completion order.
#[repr(C)]
pub struct ExecutionLog {
    cursor: AtomicU32,
    entries: [AtomicU32; LOG_CAPACITY],
}

//======================================================================================================================
// Kernels
//======================================================================================================================

/// Parses the worker core index out of the current thread's name
/// (`npurt-core-N`). Kernels run on the worker's thread, so this identifies
/// the core that executed the task.
fn current_core_index() -> u32 {
    thread::current()
        .name()
        .and_then(|name| name.strip_prefix("npurt-core-"))
        .and_then(|index| index.parse().ok())
        .expect("recording kernel must run on a worker core thread")
}

/// Recording kernel: appends `(core_index, task_id)` to the log named by its
/// first argument. The task id travels in the second argument.
///
/// # Safety
///
/// The first argument must point at a live [`ExecutionLog`].
pub unsafe extern "C" fn record_kernel(args: *const TaskArg, num_args: i32) {
    assert!(num_args == 2);
    let log: &ExecutionLog = &*((*args).base as *const ExecutionLog);
    let task_id: u32 = (*args.add(1)).base as u32;

    let slot: usize = log.cursor.fetch_add(1, Ordering::AcqRel) as usize;
    // Entries are biased by one so a zero slot means "empty"; the core index
    // travels in the upper half.
    log.entries[slot].store((current_core_index() << 16) | (task_id + 1), Ordering::Release);
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ExecutionLog {
    /// Creates an empty execution log.
    pub fn new() -> Box<ExecutionLog> {
        Box::new(unsafe { std::mem::zeroed() })
    }

    /// Builds the argument list wiring a task into the target log.
    pub fn args(&self, task_id: i32) -> [TaskArg; 2] {
        [
            TaskArg {
                base: self as *const ExecutionLog as u64,
                offset: 0,
                size: std::mem::size_of::<ExecutionLog>() as u64,
            },
            TaskArg {
                base: task_id as u64,
                offset: 0,
                size: 0,
            },
        ]
    }

    /// Returns the recorded completions in global completion order.
    pub fn records(&self) -> Vec<Record> {
        let count: usize = self.cursor.load(Ordering::Acquire) as usize;
        (0..count)
            .map(|slot| {
                let entry: u32 = self.entries[slot].load(Ordering::Acquire);
                assert!(entry != 0, "log entry claimed but not yet written");
                Record {
                    task_id: ((entry & 0xffff) - 1) as i32,
                    core_index: (entry >> 16) as usize,
                }
            })
            .collect()
    }

    /// Returns the position of a task in the completion order.
    pub fn position(&self, task_id: i32) -> usize {
        self.records()
            .iter()
            .position(|record| record.task_id == task_id)
            .expect("task was not recorded")
    }

    /// Clears the log for a fresh run.
    pub fn clear(&self) {
        self.cursor.store(0, Ordering::Release);
        for entry in self.entries.iter() {
            entry.store(0, Ordering::Release);
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Brings up a runtime with the recording kernels registered.
pub fn do_runtime(nr_aic: usize, nr_aiv: usize, sched_threads: usize) -> NpuRuntime {
    let config: Config = Config::new(nr_aic, nr_aiv, sched_threads);
    let mut runtime: NpuRuntime = NpuRuntime::new(config);
    runtime.init().expect("runtime initialization should succeed");
    runtime
        .register_kernel_fn(FUNC_CUBE, record_kernel, CoreKind::Cube)
        .expect("registering the cube kernel should succeed");
    runtime
        .register_kernel_fn(FUNC_VECTOR, record_kernel, CoreKind::Vector)
        .expect("registering the vector kernel should succeed");
    runtime
}

/// Appends a recording task of the given kind to a graph.
pub fn add_record_task(graph: &mut TaskGraph, kind: CoreKind, log: &ExecutionLog) -> i32 {
    let func_id: i32 = match kind {
        CoreKind::Cube => FUNC_CUBE,
        CoreKind::Vector => FUNC_VECTOR,
    };
    let task_id: i32 = graph.task_count();
    graph
        .add_task(func_id, &format!("record_{}", task_id), kind, &log.args(task_id))
        .expect("adding a task should succeed")
}
