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

//======================================================================================================================
// Structures
//======================================================================================================================

/// The set of worker cores owned by one scheduler thread.
///
/// Worker cores are partitioned across scheduler threads so that each cell is
/// polled by exactly one thread; the ready queues stay shared so load
/// balances between threads. The partition is a pure function of the launch
/// configuration: thread `t` owns a contiguous slice of the Cube range and a
/// contiguous slice of the Vector range, with remainders going to the
/// lower-indexed threads. For the device's documented 1 AIC : 2 AIV layout
/// this yields exactly `{t, nr_aic + 2t, nr_aic + 2t + 1}`.
#[derive(Debug)]
pub struct CoreAssignment {
    /// Core indices owned by this thread. Cube cores occupy indices
    /// `0..nr_aic`, Vector cores `nr_aic..nr_aic + nr_aiv`.
    cores: ArrayVec<usize, { limits::MAX_CORES_PER_THREAD }>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for core assignments.
impl CoreAssignment {
    /// Computes the assignment of thread `thread_idx` out of `thread_num`
    /// threads over `nr_aic` Cube cores and `nr_aiv` Vector cores.
    pub fn compute(thread_idx: usize, thread_num: usize, nr_aic: usize, nr_aiv: usize) -> Result<Self, Fail> {
        // Check if the thread index is within the configured thread count.
        if thread_num == 0 || thread_idx >= thread_num {
            let cause: String = format!("invalid scheduler thread (thread_idx={}, thread_num={})", thread_idx, thread_num);
            error!("compute(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let (aic_start, aic_len): (usize, usize) = Self::share(nr_aic, thread_num, thread_idx);
        let (aiv_start, aiv_len): (usize, usize) = Self::share(nr_aiv, thread_num, thread_idx);

        // Check if the slices fit the per-thread bounds.
        if aic_len > limits::MAX_AIC_PER_THREAD || aiv_len > limits::MAX_AIV_PER_THREAD {
            let cause: String = format!(
                "too many cores per scheduler thread (aic={}, aiv={}, max_aic={}, max_aiv={})",
                aic_len,
                aiv_len,
                limits::MAX_AIC_PER_THREAD,
                limits::MAX_AIV_PER_THREAD
            );
            error!("compute(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let mut cores: ArrayVec<usize, { limits::MAX_CORES_PER_THREAD }> = ArrayVec::new();
        for core in aic_start..aic_start + aic_len {
            cores.push(core);
        }
        for core in aiv_start..aiv_start + aiv_len {
            cores.push(nr_aic + core);
        }

        Ok(Self { cores })
    }

    /// Splits `total` items across `parts` contiguous slices, with the
    /// remainder spread over the lower-indexed slices. Returns the start and
    /// length of slice `idx`.
    fn share(total: usize, parts: usize, idx: usize) -> (usize, usize) {
        let base: usize = total / parts;
        let rem: usize = total % parts;
        let len: usize = base + usize::from(idx < rem);
        let start: usize = idx * base + idx.min(rem);
        (start, len)
    }

    /// Returns the number of cores owned by this thread.
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Checks whether this thread owns any cores.
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Iterates over the owned core indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cores.iter().copied()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
