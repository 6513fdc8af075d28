// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    registry::KernelRegistry,
    runtime::{
        fail::Fail,
        limits,
    },
};
use ::core::{
    alloc::Layout,
    mem,
    slice,
    sync::atomic::{
        AtomicI32,
        Ordering,
    },
};
use ::std::alloc;

//======================================================================================================================
// Enumerations
//======================================================================================================================

/// Kind of a worker core (and of the tasks it admits).
///
/// A Cube task must run on a Cube core, a Vector task on a Vector core. Cores
/// are not modeled as a type hierarchy: the kind is a field on both tasks and
/// handshake cells and dispatch branches on it.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoreKind {
    /// AIC core, specialized for matrix-multiply-class kernels.
    Cube = 0,
    /// AIV core, specialized for element-wise/vector kernels.
    Vector = 1,
}

/// Execution state of a task. Transitions only forward.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not all predecessors have completed.
    Pending = 0,
    /// All predecessors have completed; sitting in a ready queue.
    Ready = 1,
    /// Dispatched to a worker core.
    Running = 2,
    /// Finished executing.
    Complete = 3,
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Task argument, pointing to a region in device global memory. Opaque to the
/// scheduler; dereferenced only by the kernel itself.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskArg {
    /// Base address in device memory.
    pub base: u64,
    /// Byte offset from the base.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

/// A task record, the unit of work handed to a worker core.
///
/// The record is shared between the host (graph build), the scheduler
/// (dependency resolution) and the worker (kernel dispatch), so the layout is
/// a flat `repr(C)` structure. `fanin` is kept naturally aligned for atomic
/// operations.
#[repr(C)]
pub struct Task {
    /// Stable identifier, unique within a graph.
    task_id: i32,
    /// Selects a compiled kernel binary from the registry.
    func_id: i32,
    /// Kernel name, for diagnostics.
    func_name: [u8; limits::FUNC_NAME_LEN],
    /// Entry point of the kernel in device memory. Resolved from the registry
    /// when the graph is staged for execution.
    function_bin_addr: u64,
    /// Number of valid entries in `args`.
    num_args: i32,
    /// Argument descriptors.
    args: [TaskArg; limits::MAX_TASK_ARGS],
    /// Predecessors not yet complete. Counts down to zero during execution.
    fanin: AtomicI32,
    /// In-degree, fixed at build time.
    fanin_total: i32,
    /// Number of valid entries in `fanout`.
    num_fanout: i32,
    /// Successor task identifiers.
    fanout: [i32; limits::MAX_TASK_FANOUT],
    /// Advisory execution state. The scheduler relies on `fanin` and per-cell
    /// state for correctness, not on this field.
    status: AtomicI32,
    /// Kind of core this task is admitted to.
    core_kind: i32,
}

/// A task graph: a flat, bounded array of task records plus a counter of
/// completed tasks. Read-only on the device during execution except for
/// `fanin`, `status` and `tasks_completed`.
#[repr(C)]
pub struct TaskGraph {
    /// Number of valid entries in `tasks`.
    num_tasks: i32,
    /// Number of tasks that have reached `Complete`.
    tasks_completed: AtomicI32,
    /// Task records.
    tasks: [Task; limits::MAX_TASKS],
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for core kinds.
impl CoreKind {
    /// Converts a wire-format value into a core kind.
    pub fn from_i32(value: i32) -> Result<CoreKind, Fail> {
        match value {
            0 => Ok(CoreKind::Cube),
            1 => Ok(CoreKind::Vector),
            _ => Err(Fail::new(libc::EINVAL, "invalid core kind")),
        }
    }

    /// Returns the index of this kind in per-kind tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Associated functions for task statuses.
impl TaskStatus {
    /// Converts a wire-format value into a task status.
    fn from_i32(value: i32) -> TaskStatus {
        match value {
            1 => TaskStatus::Ready,
            2 => TaskStatus::Running,
            3 => TaskStatus::Complete,
            _ => TaskStatus::Pending,
        }
    }
}

/// Associated functions for tasks.
impl Task {
    /// Returns the identifier of the target task.
    pub fn task_id(&self) -> i32 {
        self.task_id
    }

    /// Returns the function identifier of the target task.
    pub fn func_id(&self) -> i32 {
        self.func_id
    }

    /// Returns the kernel name of the target task.
    pub fn func_name(&self) -> &str {
        let len: usize = self.func_name.iter().position(|&b| b == 0).unwrap_or(limits::FUNC_NAME_LEN);
        core::str::from_utf8(&self.func_name[..len]).unwrap_or("")
    }

    /// Returns the kernel entry point of the target task.
    pub fn function_bin_addr(&self) -> u64 {
        self.function_bin_addr
    }

    /// Returns the argument descriptors of the target task.
    pub fn args(&self) -> &[TaskArg] {
        &self.args[..self.num_args as usize]
    }

    /// Returns the number of predecessors of the target task that have not
    /// yet completed.
    pub fn fanin(&self) -> i32 {
        self.fanin.load(Ordering::Acquire)
    }

    /// Returns the in-degree of the target task.
    pub fn fanin_total(&self) -> i32 {
        self.fanin_total
    }

    /// Returns the successors of the target task.
    pub fn fanout(&self) -> &[i32] {
        &self.fanout[..self.num_fanout as usize]
    }

    /// Returns the execution state of the target task.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_i32(self.status.load(Ordering::Acquire))
    }

    /// Returns the core kind of the target task.
    pub fn core_kind(&self) -> CoreKind {
        // The kind was validated when the task was added.
        CoreKind::from_i32(self.core_kind).unwrap_or(CoreKind::Cube)
    }

    /// Advances the execution state of the target task.
    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.store(status as i32, Ordering::Release);
    }

    /// Decrements the fan-in counter of the target task, returning the
    /// previous value. Acquire-release establishes happens-before with the
    /// completion writes of every predecessor.
    pub(crate) fn consume_fanin(&self) -> i32 {
        self.fanin.fetch_sub(1, Ordering::AcqRel)
    }

    /// Binds the kernel entry point of the target task.
    fn bind(&mut self, addr: u64) {
        self.function_bin_addr = addr;
    }
}

/// Associated functions for task graphs.
impl TaskGraph {
    /// Creates an empty task graph.
    ///
    /// The graph is allocated zeroed on the heap: the flat task array is
    /// a couple of megabytes, and all-zero bytes are a valid empty graph
    /// (no tasks, every status `Pending`).
    pub fn new() -> Result<Box<TaskGraph>, Fail> {
        let layout: Layout = Layout::new::<TaskGraph>();
        let ptr: *mut TaskGraph = unsafe { alloc::alloc_zeroed(layout) as *mut TaskGraph };
        if ptr.is_null() {
            return Err(Fail::new(libc::ENOMEM, "failed to allocate task graph"));
        }

        Ok(unsafe { Box::from_raw(ptr) })
    }

    /// Appends a task to the target graph and returns its identifier. The new
    /// task has no predecessors and is `Pending`.
    pub fn add_task(
        &mut self,
        func_id: i32,
        func_name: &str,
        core_kind: CoreKind,
        args: &[TaskArg],
    ) -> Result<i32, Fail> {
        // Check if the graph is full.
        if self.num_tasks as usize >= limits::MAX_TASKS {
            let cause: String = format!("task graph is full (capacity={})", limits::MAX_TASKS);
            error!("add_task(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        // Check if the argument list fits in a task record.
        if args.len() > limits::MAX_TASK_ARGS {
            let cause: String = format!("too many task arguments (nargs={}, max={})", args.len(), limits::MAX_TASK_ARGS);
            error!("add_task(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let task_id: i32 = self.num_tasks;
        let task: &mut Task = &mut self.tasks[task_id as usize];
        task.task_id = task_id;
        task.func_id = func_id;
        task.core_kind = core_kind as i32;
        task.num_args = args.len() as i32;
        task.args[..args.len()].copy_from_slice(args);

        // Keep one trailing NUL so the name reads back as a C string.
        let name_len: usize = func_name.len().min(limits::FUNC_NAME_LEN - 1);
        task.func_name[..name_len].copy_from_slice(&func_name.as_bytes()[..name_len]);

        self.num_tasks += 1;

        Ok(task_id)
    }

    /// Adds a dependency edge `u -> v` to the target graph. Must only be
    /// called during graph build.
    pub fn add_edge(&mut self, u: i32, v: i32) -> Result<(), Fail> {
        // Check if both endpoints exist.
        if !(0..self.num_tasks).contains(&u) || !(0..self.num_tasks).contains(&v) {
            let cause: String = format!("invalid edge (u={}, v={}, num_tasks={})", u, v, self.num_tasks);
            error!("add_edge(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        // Check if the fan-out of the source is full.
        let src: &mut Task = &mut self.tasks[u as usize];
        if src.num_fanout as usize >= limits::MAX_TASK_FANOUT {
            let cause: String = format!("task fan-out is full (task_id={}, capacity={})", u, limits::MAX_TASK_FANOUT);
            error!("add_edge(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        src.fanout[src.num_fanout as usize] = v;
        src.num_fanout += 1;

        let dst: &mut Task = &mut self.tasks[v as usize];
        *dst.fanin.get_mut() += 1;
        dst.fanin_total += 1;

        Ok(())
    }

    /// Returns the identifiers of all tasks with no pending predecessors.
    pub fn initial_ready(&self) -> Vec<i32> {
        self.tasks()
            .iter()
            .filter(|task| task.fanin() == 0)
            .map(|task| task.task_id)
            .collect()
    }

    /// Returns a reference to a task.
    pub fn get(&self, task_id: i32) -> Result<&Task, Fail> {
        if !(0..self.num_tasks).contains(&task_id) {
            let cause: String = format!("invalid task id (task_id={}, num_tasks={})", task_id, self.num_tasks);
            error!("get(): {}", cause);
            return Err(Fail::new(libc::EFAULT, &cause));
        }

        Ok(&self.tasks[task_id as usize])
    }

    /// Returns the valid task records of the target graph.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks[..self.num_tasks as usize]
    }

    /// Returns the number of tasks in the target graph.
    pub fn task_count(&self) -> i32 {
        self.num_tasks
    }

    /// Returns the number of completed tasks in the target graph.
    pub fn completed_count(&self) -> i32 {
        self.tasks_completed.load(Ordering::Acquire)
    }

    /// Records one task completion in the target graph.
    pub(crate) fn note_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolves the kernel entry point of every task from the registry.
    /// Called on the staged device image before launch, so the host mirror of
    /// the graph is never mutated.
    pub fn bind_kernels(&mut self, registry: &KernelRegistry) -> Result<(), Fail> {
        let num_tasks: usize = self.num_tasks as usize;
        for task in self.tasks[..num_tasks].iter_mut() {
            let (addr, kind): (u64, CoreKind) = registry.lookup(task.func_id)?;

            // Admission restriction: a task may only name a kernel compiled
            // for its own core kind.
            if kind != task.core_kind() {
                let cause: String =
                    format!("kernel core kind mismatch (task_id={}, func_id={})", task.task_id, task.func_id);
                error!("bind_kernels(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }

            task.bind(addr);
        }

        Ok(())
    }

    /// Returns a byte view of the target graph, for staging to device memory.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self as *const TaskGraph as *const u8, mem::size_of::<TaskGraph>()) }
    }

    /// Checks that the target graph is acyclic. A cyclic graph can never
    /// drain and would stall the scheduler, so it is rejected on the host
    /// before any kernel is launched.
    pub fn validate_acyclic(&self) -> Result<(), Fail> {
        let num_tasks: usize = self.num_tasks as usize;
        let mut indegree: Vec<i32> = self.tasks().iter().map(Task::fanin_total).collect();
        let mut frontier: Vec<usize> = (0..num_tasks).filter(|&i| indegree[i] == 0).collect();

        let mut visited: usize = 0;
        while let Some(i) = frontier.pop() {
            visited += 1;
            for &succ in self.tasks[i].fanout() {
                indegree[succ as usize] -= 1;
                if indegree[succ as usize] == 0 {
                    frontier.push(succ as usize);
                }
            }
        }

        if visited != num_tasks {
            let cause: String = format!("task graph has a cycle ({} of {} tasks reachable)", visited, num_tasks);
            error!("validate_acyclic(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod test {
    use super::{
        CoreKind,
        TaskArg,
        TaskGraph,
        TaskStatus,
    };
    use crate::runtime::limits;

    /// Builds a graph with a valid diamond topology.
    fn do_diamond() -> Box<TaskGraph> {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();

        let t0: i32 = graph.add_task(0, "head", CoreKind::Cube, &[]).unwrap();
        let t1: i32 = graph.add_task(1, "left", CoreKind::Vector, &[]).unwrap();
        let t2: i32 = graph.add_task(1, "right", CoreKind::Vector, &[]).unwrap();
        let t3: i32 = graph.add_task(0, "tail", CoreKind::Cube, &[]).unwrap();

        graph.add_edge(t0, t1).unwrap();
        graph.add_edge(t0, t2).unwrap();
        graph.add_edge(t1, t3).unwrap();
        graph.add_edge(t2, t3).unwrap();

        graph
    }

    /// Tests if a new graph is empty.
    #[test]
    fn new() {
        let graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        assert!(graph.task_count() == 0);
        assert!(graph.completed_count() == 0);
        assert!(graph.initial_ready().is_empty());
    }

    /// Tests if tasks and edges build the expected dependency structure.
    #[test]
    fn build_diamond() {
        let graph: Box<TaskGraph> = do_diamond();

        assert!(graph.task_count() == 4);
        assert!(graph.initial_ready() == vec![0]);

        let head = graph.get(0).unwrap();
        assert!(head.fanout() == &[1, 2]);
        assert!(head.fanin() == 0);
        assert!(head.status() == TaskStatus::Pending);
        assert!(head.func_name() == "head");

        let tail = graph.get(3).unwrap();
        assert!(tail.fanin() == 2);
        assert!(tail.fanin_total() == 2);
        assert!(tail.core_kind() == CoreKind::Cube);
    }

    /// Tests if argument descriptors are carried through the task record.
    #[test]
    fn task_args() {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        let args: [TaskArg; 2] = [
            TaskArg { base: 0x1000, offset: 0, size: 64 },
            TaskArg { base: 0x2000, offset: 32, size: 16 },
        ];

        let tid: i32 = graph.add_task(7, "scale", CoreKind::Vector, &args).unwrap();
        let task = graph.get(tid).unwrap();

        assert!(task.args() == &args[..]);
        assert!(task.func_id() == 7);
    }

    /// Tests if we fail to add an edge with an invalid endpoint.
    #[test]
    fn bad_edge() {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        let t0: i32 = graph.add_task(0, "only", CoreKind::Cube, &[]).unwrap();

        match graph.add_edge(t0, 7) {
            Ok(_) => panic!("adding an edge to a missing task should fail"),
            Err(_) => {},
        };
    }

    /// Tests if we fail to overflow the fan-out of a task.
    #[test]
    fn fanout_overflow() {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        let src: i32 = graph.add_task(0, "src", CoreKind::Cube, &[]).unwrap();
        for i in 0..limits::MAX_TASK_FANOUT {
            let dst: i32 = graph.add_task(0, &format!("dst{}", i), CoreKind::Cube, &[]).unwrap();
            graph.add_edge(src, dst).unwrap();
        }

        let dst: i32 = graph.add_task(0, "one-too-many", CoreKind::Cube, &[]).unwrap();
        match graph.add_edge(src, dst) {
            Ok(_) => panic!("overflowing the fan-out of a task should fail"),
            Err(_) => {},
        };
    }

    /// Tests if we fail to overflow the argument list of a task.
    #[test]
    fn args_overflow() {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        let args: Vec<TaskArg> = vec![TaskArg::default(); limits::MAX_TASK_ARGS + 1];

        match graph.add_task(0, "fat", CoreKind::Cube, &args) {
            Ok(_) => panic!("overflowing the argument list of a task should fail"),
            Err(_) => {},
        };
    }

    /// Tests if cycle detection accepts a DAG and rejects a cycle.
    #[test]
    fn acyclic_validation() {
        let graph: Box<TaskGraph> = do_diamond();
        graph.validate_acyclic().unwrap();

        let mut cyclic: Box<TaskGraph> = TaskGraph::new().unwrap();
        let a: i32 = cyclic.add_task(0, "a", CoreKind::Cube, &[]).unwrap();
        let b: i32 = cyclic.add_task(0, "b", CoreKind::Cube, &[]).unwrap();
        cyclic.add_edge(a, b).unwrap();
        cyclic.add_edge(b, a).unwrap();

        match cyclic.validate_acyclic() {
            Ok(_) => panic!("validating a cyclic graph should fail"),
            Err(_) => {},
        };
    }

    /// Tests if long kernel names are truncated and read back as strings.
    #[test]
    fn long_func_name() {
        let mut graph: Box<TaskGraph> = TaskGraph::new().unwrap();
        let name: String = "k".repeat(2 * limits::FUNC_NAME_LEN);

        let tid: i32 = graph.add_task(0, &name, CoreKind::Cube, &[]).unwrap();
        let task = graph.get(tid).unwrap();

        assert!(task.func_name().len() == limits::FUNC_NAME_LEN - 1);
    }
}
