// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Task-graph scheduler.
//!
//! One instance of [`scheduler_main`] runs per scheduler thread. Each thread
//! owns a disjoint subset of the worker cores (so no two threads ever touch
//! the same handshake cell), while the two ready queues are shared across
//! threads so load balances naturally. The first thread to arrive claims
//! initialization through a one-shot compare-and-swap, seeds the queues with
//! the initially ready tasks and releases the init barrier; the last thread
//! to leave resets the shared state so the next execution starts clean.

pub mod assignment;
pub mod queue;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    device::KernelArgs,
    graph::{
        CoreKind,
        Task,
        TaskGraph,
        TaskStatus,
    },
    handshake::{
        self,
        HandshakeCell,
    },
    runtime::{
        fail::Fail,
        limits,
    },
    scheduler::{
        assignment::CoreAssignment,
        queue::ReadyQueue,
    },
};
use ::core::{
    hint,
    sync::atomic::{
        AtomicBool,
        AtomicI32,
        Ordering,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// State shared by all scheduler threads of one runtime.
///
/// This is an owned context handed to every scheduler-thread entry, not
/// process-wide static state. It survives across executions; the exit barrier
/// resets it after each one.
pub struct SchedulerShared {
    /// Snapshot of the task count taken at init.
    total_tasks: AtomicI32,
    /// Number of tasks completed so far.
    completed_tasks: AtomicI32,
    /// Ready queue for Cube tasks.
    cube_queue: ReadyQueue,
    /// Ready queue for Vector tasks.
    vector_queue: ReadyQueue,
    /// One-shot claim on initialization.
    init_claimed: AtomicBool,
    /// Init barrier: set once shared state is seeded.
    init_done: AtomicBool,
    /// Init barrier: set if initialization failed.
    init_failed: AtomicBool,
    /// Exit barrier: number of threads that finished their loop.
    finished_count: AtomicI32,
    /// Hands out thread indices to arriving scheduler threads.
    thread_counter: AtomicI32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for the shared scheduler state.
impl SchedulerShared {
    /// Creates a fresh shared scheduler state.
    pub fn new() -> Self {
        Self {
            total_tasks: AtomicI32::new(0),
            completed_tasks: AtomicI32::new(0),
            cube_queue: ReadyQueue::new(),
            vector_queue: ReadyQueue::new(),
            init_claimed: AtomicBool::new(false),
            init_done: AtomicBool::new(false),
            init_failed: AtomicBool::new(false),
            finished_count: AtomicI32::new(0),
            thread_counter: AtomicI32::new(0),
        }
    }

    /// Returns the ready queue for a core kind.
    fn queue(&self, kind: CoreKind) -> &ReadyQueue {
        match kind {
            CoreKind::Cube => &self.cube_queue,
            CoreKind::Vector => &self.vector_queue,
        }
    }

    /// Seeds the shared state for one execution. Runs on exactly one thread,
    /// before the init barrier is released.
    fn seed(&self, kargs: &KernelArgs, graph: &TaskGraph) -> Result<(), Fail> {
        let thread_num: usize = kargs.sched_threads as usize;

        // Check if the thread count is within the static maximum.
        if !(1..=limits::MAX_SCHED_THREADS).contains(&thread_num) {
            let cause: String = format!(
                "invalid scheduler thread count (threads={}, max={})",
                thread_num,
                limits::MAX_SCHED_THREADS
            );
            error!("seed(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        // Check if every thread's core slice fits the per-thread bounds.
        for t in 0..thread_num {
            CoreAssignment::compute(t, thread_num, kargs.aic_num as usize, kargs.aiv_num as usize)?;
        }

        self.total_tasks.store(graph.task_count(), Ordering::Release);
        self.completed_tasks.store(0, Ordering::Release);

        // Partition the initially ready tasks by core kind.
        let mut nr_cube: usize = 0;
        let mut nr_vector: usize = 0;
        for task in graph.tasks() {
            if task.fanin() == 0 {
                task.set_status(TaskStatus::Ready);
                self.queue(task.core_kind()).push(task.task_id())?;
                match task.core_kind() {
                    CoreKind::Cube => nr_cube += 1,
                    CoreKind::Vector => nr_vector += 1,
                }
            }
        }
        info!(
            "seed(): {} tasks, initially ready: cube={}, vector={}",
            graph.task_count(),
            nr_cube,
            nr_vector
        );

        self.finished_count.store(0, Ordering::Release);

        Ok(())
    }

    /// Resets the shared state after an execution. Runs on the last thread
    /// through the exit barrier, so the next execution starts clean.
    fn reset(&self) {
        self.cube_queue.clear();
        self.vector_queue.clear();
        self.total_tasks.store(0, Ordering::Release);
        self.completed_tasks.store(0, Ordering::Release);
        self.thread_counter.store(0, Ordering::Release);
        self.finished_count.store(0, Ordering::Release);
        self.init_done.store(false, Ordering::Release);
        self.init_failed.store(false, Ordering::Release);
        self.init_claimed.store(false, Ordering::Release);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default trait implementation.
impl Default for SchedulerShared {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Scheduler-thread entry point.
pub fn scheduler_main(kargs: KernelArgs, shared: &SchedulerShared) -> Result<(), Fail> {
    let thread_idx: usize = shared.thread_counter.fetch_add(1, Ordering::AcqRel) as usize;
    let graph: &TaskGraph = unsafe { &*(kargs.graph_base as *const TaskGraph) };
    let cells: &[HandshakeCell] = unsafe { handshake::cells_from_addr(kargs.hank_base, kargs.core_num as usize) };

    // One-shot initialization: the first thread to claim the flag seeds the
    // shared state; everyone else spins on the init barrier.
    if shared
        .init_claimed
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        if let Err(e) = shared.seed(&kargs, graph) {
            shared.init_failed.store(true, Ordering::Release);
            return Err(e);
        }
        shared.init_done.store(true, Ordering::Release);
    } else {
        while !shared.init_done.load(Ordering::Acquire) {
            if shared.init_failed.load(Ordering::Acquire) {
                return Err(Fail::new(libc::EINVAL, "scheduler initialization failed"));
            }
            hint::spin_loop();
            ::std::thread::yield_now();
        }
    }

    let assignment: CoreAssignment = CoreAssignment::compute(
        thread_idx,
        kargs.sched_threads as usize,
        kargs.aic_num as usize,
        kargs.aiv_num as usize,
    )?;
    trace!("scheduler_main(): thread {} owns {} cores", thread_idx, assignment.len());

    // Per-core bring-up handshake over the owned cores.
    for core in assignment.iter() {
        cells[core].signal_ready();
    }
    for core in assignment.iter() {
        while cells[core].poll_ack() == 0 {
            hint::spin_loop();
            ::std::thread::yield_now();
        }
    }
    trace!("scheduler_main(): thread {} handshake complete", thread_idx);

    let completed: usize = run(graph, cells, &assignment, shared)?;
    debug!("scheduler_main(): thread {} collected {} completions", thread_idx, completed);

    // Tear-down: quit the owned cores.
    for core in assignment.iter() {
        cells[core].request_quit();
    }

    // Exit barrier: the last thread out resets the shared state.
    let prev_finished: i32 = shared.finished_count.fetch_add(1, Ordering::AcqRel);
    if prev_finished + 1 == kargs.sched_threads {
        shared.reset();
    }

    Ok(())
}

/// The per-thread scheduling loop: collect completions from owned cores,
/// propagate dependencies, dispatch ready tasks of the matching kind to idle
/// owned cores. Runs until every task in the graph has completed.
fn run(
    graph: &TaskGraph,
    cells: &[HandshakeCell],
    assignment: &CoreAssignment,
    shared: &SchedulerShared,
) -> Result<usize, Fail> {
    let total_tasks: i32 = shared.total_tasks.load(Ordering::Acquire);
    let mut in_flight: usize = 0;
    let mut collected: usize = 0;

    while shared.completed_tasks.load(Ordering::Acquire) < total_tasks {
        // Phase 1: collect completions from owned cores.
        for core in assignment.iter() {
            let cell: &HandshakeCell = &cells[core];
            if let Some(task_addr) = cell.take_completion() {
                let task: &Task = unsafe { &*(task_addr as *const Task) };
                trace!("run(): core {} completed task {}", core, task.task_id());

                // The completion write precedes the fan-in decrements, so a
                // successor that observes a zero fan-in also observes every
                // predecessor as complete.
                task.set_status(TaskStatus::Complete);
                for &succ_id in task.fanout() {
                    let succ: &Task = graph.get(succ_id)?;
                    if succ.consume_fanin() == 1 {
                        succ.set_status(TaskStatus::Ready);
                        shared.queue(succ.core_kind()).push(succ_id)?;
                        trace!("run(): task {} is now ready", succ_id);
                    }
                }

                cell.retire_task();
                graph.note_completed();
                shared.completed_tasks.fetch_add(1, Ordering::Release);
                in_flight -= 1;
                collected += 1;
            }
        }

        // Short-circuit the dispatch phase while all owned cores are busy.
        if in_flight == assignment.len() {
            ::std::thread::yield_now();
            continue;
        }

        // Phase 2: dispatch ready tasks of the matching kind to idle cores.
        for core in assignment.iter() {
            let cell: &HandshakeCell = &cells[core];
            if !cell.is_idle() {
                continue;
            }

            if let Some(task_id) = shared.queue(cell.core_kind()).pop() {
                let task: &Task = graph.get(task_id)?;
                task.set_status(TaskStatus::Running);
                cell.publish(task as *const Task as u64);
                in_flight += 1;
                trace!("run(): dispatched task {} to core {}", task_id, core);
            }
        }

        // Spin-wait; on the host platform the poll interval is one scheduling
        // quantum rather than a cache refill.
        ::std::thread::yield_now();
    }

    Ok(collected)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
