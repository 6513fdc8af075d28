// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod fail;
pub mod limits;
pub mod logging;
pub mod memory;
pub mod stats;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::Config,
    device::{
        self,
        KernelArgs,
        Stream,
    },
    graph::{
        CoreKind,
        TaskGraph,
        TaskStatus,
    },
    handshake::{
        self,
        HandshakeCell,
    },
    registry::KernelRegistry,
    runtime::{
        fail::Fail,
        memory::DeviceBuffer,
        stats::RuntimeStats,
    },
    scheduler::SchedulerShared,
    worker::KernelFn,
};
use ::core::mem;
use ::std::{
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Post-execution state of one worker core's handshake cell, for diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct CoreState {
    /// Kind of the core.
    pub core_kind: CoreKind,
    /// Control flag (1 after shutdown).
    pub control: u32,
    /// Doorbell (0 when idle).
    pub task_status: u32,
    /// Task address (0 when retired).
    pub task_addr: u64,
}

/// The host-side runtime: owns the device resources, the kernel registry and
/// the scheduler context, and drives execution of task graphs.
pub struct NpuRuntime {
    /// Runtime configuration.
    config: Config,
    /// Kernel registry, populated at initialization.
    registry: KernelRegistry,
    /// Scheduler context shared by all scheduler threads. Created at init and
    /// reused across executions; the scheduler's exit barrier resets it.
    shared: Option<Arc<SchedulerShared>>,
    /// Device copy of the handshake array.
    hank: Option<DeviceBuffer>,
    /// Device copy of the staged task graph.
    graph_dev: Option<DeviceBuffer>,
    /// Diagnostics from the last execution.
    stats: RuntimeStats,
    /// Lifecycle flag.
    initialized: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for the host runtime.
impl NpuRuntime {
    /// Creates a new runtime. No device resources are acquired until
    /// [`NpuRuntime::init`] runs.
    pub fn new(config: Config) -> Self {
        logging::initialize();

        Self {
            config,
            registry: KernelRegistry::new(),
            shared: None,
            hank: None,
            graph_dev: None,
            stats: RuntimeStats::default(),
            initialized: false,
        }
    }

    /// Initializes the runtime: validates the configuration, allocates the
    /// handshake array and the graph staging area in device memory, and loads
    /// kernel binaries from the configured directories.
    pub fn init(&mut self) -> Result<(), Fail> {
        // Check for lifecycle misuse.
        if self.initialized {
            return Err(Fail::new(libc::EALREADY, "runtime is already initialized"));
        }

        self.config.validate()?;
        info!(
            "init(): {} cube cores, {} vector cores, {} scheduler threads (device {})",
            self.config.nr_aic, self.config.nr_aiv, self.config.sched_threads, self.config.device_index
        );

        let hank_len: usize = self.config.core_num() * mem::size_of::<HandshakeCell>();
        self.hank = Some(DeviceBuffer::new(hank_len)?);
        self.graph_dev = Some(DeviceBuffer::new(mem::size_of::<TaskGraph>())?);
        self.shared = Some(Arc::new(SchedulerShared::new()));

        // Load kernel binaries, one file per func_id. Partial init resources
        // are released before the error surfaces.
        if let Err(e) = self.load_kernel_dirs() {
            self.release();
            return Err(e);
        }

        self.initialized = true;

        Ok(())
    }

    /// Loads the configured kernel directories into the registry.
    fn load_kernel_dirs(&mut self) -> Result<(), Fail> {
        if let Some(dir) = self.config.aic_kernel_dir.clone() {
            let count: usize = self.load_kernel_dir(&dir, CoreKind::Cube)?;
            info!("init(): loaded {} cube kernels from {:?}", count, dir);
        }
        if let Some(dir) = self.config.aiv_kernel_dir.clone() {
            let count: usize = self.load_kernel_dir(&dir, CoreKind::Vector)?;
            info!("init(): loaded {} vector kernels from {:?}", count, dir);
        }

        Ok(())
    }

    /// Releases every device resource held by the runtime.
    fn release(&mut self) {
        self.hank = None;
        self.graph_dev = None;
        self.shared = None;
        self.registry = KernelRegistry::new();
    }

    /// Executes a task graph and blocks until every task has completed.
    ///
    /// The host mirror of the graph is staged to device memory unchanged, so
    /// re-executing the same graph starts from the same pristine state.
    pub fn execute(&mut self, graph: &TaskGraph) -> Result<(), Fail> {
        // Check for lifecycle misuse.
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        // A task kind with no matching core could never be dispatched, and a
        // cyclic graph could never drain.
        self.check_admissible(graph)?;
        graph.validate_acyclic()?;

        let start: Instant = Instant::now();

        // Step 1: reset the handshake array.
        let nr_aic: usize = self.config.nr_aic;
        for (index, cell) in self.cells()?.iter().enumerate() {
            let kind: CoreKind = if index < nr_aic { CoreKind::Cube } else { CoreKind::Vector };
            cell.reset(kind);
        }

        // Step 2: stage the graph and resolve kernel entry points on the
        // device image.
        let kargs: KernelArgs = self.kernel_args()?;
        let shared: Arc<SchedulerShared> = match self.shared.as_ref() {
            Some(shared) => shared.clone(),
            None => return Err(Fail::new(libc::EFAULT, "scheduler context is missing")),
        };
        match self.graph_dev.as_mut() {
            Some(graph_dev) => graph_dev.copy_in(0, graph.as_bytes())?,
            None => return Err(Fail::new(libc::EFAULT, "device graph buffer is missing")),
        };
        {
            let staged: &mut TaskGraph = unsafe { &mut *(kargs.graph_base as *mut TaskGraph) };
            staged.bind_kernels(&self.registry)?;
        }

        // Step 3: launch the scheduler kernel, then the worker kernel, each
        // on its own stream.
        let mut sched_stream: Stream = Stream::new();
        let mut worker_stream: Stream = Stream::new();
        device::launch_schedulers(&mut sched_stream, kargs, &shared)?;
        device::launch_workers(&mut worker_stream, kargs)?;

        // Step 4: synchronize both streams.
        let sched_result: Result<(), Fail> = sched_stream.synchronize();
        if sched_result.is_err() {
            // The scheduler kernel failed before tearing the workers down;
            // wake and quit every core so the worker stream can be joined.
            for cell in self.cells()?.iter() {
                cell.request_quit();
                cell.signal_ready();
            }
        }
        worker_stream.synchronize()?;
        sched_result?;

        // Step 5: collect diagnostics from the device image of the graph.
        let staged: &TaskGraph = unsafe { &*(kargs.graph_base as *const TaskGraph) };
        let completed: i64 = staged.completed_count() as i64;
        let mut cube_tasks: i64 = 0;
        let mut vector_tasks: i64 = 0;
        for task in staged.tasks() {
            if task.status() == TaskStatus::Complete {
                match task.core_kind() {
                    CoreKind::Cube => cube_tasks += 1,
                    CoreKind::Vector => vector_tasks += 1,
                }
            }
        }
        self.stats = RuntimeStats {
            tasks_scheduled: completed,
            tasks_completed: completed,
            cube_tasks_executed: cube_tasks,
            vector_tasks_executed: vector_tasks,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            kernels_loaded: self.registry.count(),
        };
        info!(
            "execute(): {} tasks completed in {:.2} ms",
            completed, self.stats.execution_time_ms
        );

        Ok(())
    }

    /// Releases all device resources held by the runtime.
    pub fn finalize(&mut self) -> Result<(), Fail> {
        // Check for lifecycle misuse.
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        self.release();
        self.initialized = false;
        info!("finalize(): released device resources");

        Ok(())
    }

    /// Loads a compiled kernel binary into the registry.
    pub fn register_kernel(&mut self, func_id: i32, path: &Path, core_kind: CoreKind) -> Result<(), Fail> {
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        self.registry.load_binary(func_id, path, core_kind)
    }

    /// Registers an in-process kernel entry point.
    pub fn register_kernel_fn(&mut self, func_id: i32, kernel: KernelFn, core_kind: CoreKind) -> Result<(), Fail> {
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        self.registry.register_fn(func_id, kernel, core_kind)
    }

    /// Allocates a region of device memory.
    pub fn malloc(&mut self, len: usize) -> Result<DeviceBuffer, Fail> {
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        DeviceBuffer::new(len)
    }

    /// Copies a host buffer into device memory.
    pub fn copy_to_device(&self, dst: &mut DeviceBuffer, src: &[u8]) -> Result<(), Fail> {
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        dst.copy_in(0, src)
    }

    /// Copies device memory back into a host buffer.
    pub fn copy_from_device(&self, dst: &mut [u8], src: &DeviceBuffer) -> Result<(), Fail> {
        if !self.initialized {
            return Err(Fail::new(libc::ENODEV, "runtime is not initialized"));
        }

        src.copy_out(0, dst)
    }

    /// Returns the diagnostics of the last execution.
    pub fn get_stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Prints the diagnostics of the last execution.
    pub fn print_stats(&self) {
        self.stats.print();
    }

    /// Checks whether the runtime is initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the post-execution state of every worker core's handshake
    /// cell, for diagnostics.
    pub fn core_states(&self) -> Result<Vec<CoreState>, Fail> {
        let cells: &[HandshakeCell] = self.cells()?;
        Ok(cells
            .iter()
            .map(|cell| CoreState {
                core_kind: cell.core_kind(),
                control: cell.control(),
                task_status: cell.task_status(),
                task_addr: cell.task_addr(),
            })
            .collect())
    }

    /// Views the handshake array in device memory.
    fn cells(&self) -> Result<&[HandshakeCell], Fail> {
        match self.hank.as_ref() {
            Some(hank) => Ok(unsafe { handshake::cells_from_addr(hank.addr(), self.config.core_num()) }),
            None => Err(Fail::new(libc::EFAULT, "handshake array is missing")),
        }
    }

    /// Builds the launch descriptor for the current configuration.
    fn kernel_args(&self) -> Result<KernelArgs, Fail> {
        let hank: &DeviceBuffer = match self.hank.as_ref() {
            Some(hank) => hank,
            None => return Err(Fail::new(libc::EFAULT, "handshake array is missing")),
        };
        let graph_dev: &DeviceBuffer = match self.graph_dev.as_ref() {
            Some(graph_dev) => graph_dev,
            None => return Err(Fail::new(libc::EFAULT, "device graph buffer is missing")),
        };

        Ok(KernelArgs {
            hank_base: hank.addr(),
            graph_base: graph_dev.addr(),
            core_num: self.config.core_num() as i32,
            aic_num: self.config.nr_aic as i32,
            aiv_num: self.config.nr_aiv as i32,
            sched_threads: self.config.sched_threads as i32,
        })
    }

    /// Checks that every task in the graph has at least one core of its kind
    /// to run on.
    fn check_admissible(&self, graph: &TaskGraph) -> Result<(), Fail> {
        for task in graph.tasks() {
            let available: usize = match task.core_kind() {
                CoreKind::Cube => self.config.nr_aic,
                CoreKind::Vector => self.config.nr_aiv,
            };
            if available == 0 {
                let cause: String = format!(
                    "no core can admit task (task_id={}, kind={:?})",
                    task.task_id(),
                    task.core_kind()
                );
                error!("check_admissible(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
        }

        Ok(())
    }

    /// Loads every kernel binary in a directory. File stems name the
    /// `func_id`; files that do not parse are skipped.
    fn load_kernel_dir(&mut self, dir: &Path, core_kind: CoreKind) -> Result<usize, Fail> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                let cause: String = format!("failed to read kernel directory (dir={:?}, error={})", dir, e);
                error!("load_kernel_dir(): {}", cause);
                return Err(Fail::new(libc::ENOEXEC, &cause));
            },
        };

        let mut count: usize = 0;
        for entry in entries.flatten() {
            let path: PathBuf = entry.path();
            if !path.is_file() {
                continue;
            }

            let func_id: i32 = match path.file_stem().and_then(|stem| stem.to_str()).and_then(|stem| stem.parse().ok()) {
                Some(func_id) => func_id,
                None => {
                    warn!("load_kernel_dir(): skipping {:?} (file stem is not a func_id)", path);
                    continue;
                },
            };

            self.registry.load_binary(func_id, &path, core_kind)?;
            count += 1;
        }

        Ok(count)
    }
}
