// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod device;
pub mod graph;
pub mod handshake;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod worker;

pub use self::{
    config::Config,
    graph::{
        CoreKind,
        Task,
        TaskArg,
        TaskGraph,
        TaskStatus,
    },
    runtime::{
        fail::Fail,
        memory::DeviceBuffer,
        stats::RuntimeStats,
        CoreState,
        NpuRuntime,
    },
    worker::KernelFn,
};
