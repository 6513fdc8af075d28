// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Maximum number of tasks in a single task graph.
pub const MAX_TASKS: usize = 4096;

/// Maximum number of argument descriptors carried by a task.
pub const MAX_TASK_ARGS: usize = 16;

/// Maximum number of successors of a task.
pub const MAX_TASK_FANOUT: usize = 16;

/// Length of the function name field in a task record.
pub const FUNC_NAME_LEN: usize = 64;

/// Maximum number of worker cores (AIC + AIV) per device.
pub const MAX_WORKERS: usize = 128;

/// Maximum number of entries in the kernel registry.
pub const MAX_FUNC_IDS: usize = 256;

/// Maximum number of scheduler threads.
pub const MAX_SCHED_THREADS: usize = 4;

/// Maximum number of Cube cores owned by one scheduler thread.
pub const MAX_AIC_PER_THREAD: usize = 24;

/// Maximum number of Vector cores owned by one scheduler thread.
pub const MAX_AIV_PER_THREAD: usize = 48;

/// Maximum number of cores owned by one scheduler thread.
pub const MAX_CORES_PER_THREAD: usize = MAX_AIC_PER_THREAD + MAX_AIV_PER_THREAD;
