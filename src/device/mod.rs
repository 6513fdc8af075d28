// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Kernel launch plumbing for the host platform.
//!
//! The device is modeled by the host itself: a stream is a set of joinable
//! kernel launches, the scheduler kernel runs one OS thread per configured
//! scheduler instance and the worker kernel runs one OS thread per worker
//! core. Two streams (one for the scheduler kernel, one for the workers)
//! permit concurrent submission, and stream synchronization is a join
//! barrier.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    handshake::{
        self,
        HandshakeCell,
    },
    runtime::fail::Fail,
    scheduler::{
        self,
        SchedulerShared,
    },
    worker,
};
use ::std::{
    sync::Arc,
    thread::{
        self,
        JoinHandle,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Launch descriptor passed from the host to every kernel instance.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct KernelArgs {
    /// Device address of the handshake array.
    pub hank_base: u64,
    /// Device address of the staged task graph.
    pub graph_base: u64,
    /// Total number of worker cores.
    pub core_num: i32,
    /// Number of Cube (AIC) cores.
    pub aic_num: i32,
    /// Number of Vector (AIV) cores.
    pub aiv_num: i32,
    /// Number of scheduler threads.
    pub sched_threads: i32,
}

/// An ordered set of kernel launches that can be synchronized as one unit.
pub struct Stream {
    /// Launches submitted to this stream.
    handles: Vec<JoinHandle<Result<(), Fail>>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for streams.
impl Stream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self { handles: Vec::new() }
    }

    /// Submits a kernel launch to the target stream.
    pub fn launch<F>(&mut self, name: String, kernel: F) -> Result<(), Fail>
    where
        F: FnOnce() -> Result<(), Fail> + Send + 'static,
    {
        match thread::Builder::new().name(name).spawn(kernel) {
            Ok(handle) => {
                self.handles.push(handle);
                Ok(())
            },
            Err(e) => {
                let cause: String = format!("failed to launch kernel thread (error={})", e);
                error!("launch(): {}", cause);
                Err(Fail::new(libc::EIO, &cause))
            },
        }
    }

    /// Waits for every launch submitted to the target stream. The first
    /// kernel failure, if any, is reported after all launches have been
    /// joined.
    pub fn synchronize(&mut self) -> Result<(), Fail> {
        let mut first_failure: Option<Fail> = None;

        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    error!("synchronize(): kernel failed (error={:?})", e);
                    first_failure.get_or_insert(e);
                },
                Err(_) => {
                    let fail: Fail = Fail::new(libc::EFAULT, "kernel thread panicked");
                    error!("synchronize(): {}", fail.cause);
                    first_failure.get_or_insert(fail);
                },
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns the number of outstanding launches.
    pub fn pending(&self) -> usize {
        self.handles.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default trait implementation.
impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Launches the scheduler kernel: one instance per configured scheduler
/// thread, all sharing one scheduler context.
pub fn launch_schedulers(stream: &mut Stream, kargs: KernelArgs, shared: &Arc<SchedulerShared>) -> Result<(), Fail> {
    for instance in 0..kargs.sched_threads {
        let shared: Arc<SchedulerShared> = shared.clone();
        stream.launch(format!("npurt-sched-{}", instance), move || {
            scheduler::scheduler_main(kargs, &shared)
        })?;
    }

    Ok(())
}

/// Launches the worker kernel: one instance per worker core.
pub fn launch_workers(stream: &mut Stream, kargs: KernelArgs) -> Result<(), Fail> {
    for core in 0..kargs.core_num as usize {
        stream.launch(format!("npurt-core-{}", core), move || {
            let cells: &[HandshakeCell] = unsafe { handshake::cells_from_addr(kargs.hank_base, kargs.core_num as usize) };
            worker::worker_main(&cells[core], core);
            Ok(())
        })?;
    }

    Ok(())
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod test {
    use super::Stream;
    use crate::runtime::fail::Fail;

    /// Tests if a stream joins its launches on synchronize.
    #[test]
    fn launch_synchronize() {
        let mut stream: Stream = Stream::new();

        for i in 0..4 {
            stream.launch(format!("test-{}", i), || Ok(())).unwrap();
        }
        assert!(stream.pending() == 4);

        stream.synchronize().unwrap();
        assert!(stream.pending() == 0);
    }

    /// Tests if a kernel failure surfaces from synchronize after all
    /// launches have been joined.
    #[test]
    fn failure_surfaces() {
        let mut stream: Stream = Stream::new();

        stream.launch("test-ok".to_string(), || Ok(())).unwrap();
        stream
            .launch("test-bad".to_string(), || Err(Fail::new(libc::EIO, "injected failure")))
            .unwrap();

        match stream.synchronize() {
            Ok(_) => panic!("a failed kernel should surface from synchronize"),
            Err(e) => assert!(e.errno == libc::EIO),
        };
        assert!(stream.pending() == 0);
    }
}
