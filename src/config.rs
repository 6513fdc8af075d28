// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        limits,
    },
    scheduler::assignment::CoreAssignment,
};
use ::std::{
    env,
    fs,
    path::PathBuf,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default number of Cube (AIC) worker cores.
const DEFAULT_NR_AIC: usize = 24;

/// Default number of Vector (AIV) worker cores.
const DEFAULT_NR_AIV: usize = 48;

/// Default number of scheduler threads.
const DEFAULT_SCHED_THREADS: usize = 3;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of Cube (AIC) worker cores.
    pub nr_aic: usize,
    /// Number of Vector (AIV) worker cores.
    pub nr_aiv: usize,
    /// Number of scheduler threads.
    pub sched_threads: usize,
    /// Directory of compiled Cube kernel binaries, one file per `func_id`.
    pub aic_kernel_dir: Option<PathBuf>,
    /// Directory of compiled Vector kernel binaries, one file per `func_id`.
    pub aiv_kernel_dir: Option<PathBuf>,
    /// Device index.
    pub device_index: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for runtime configurations.
impl Config {
    /// Creates a configuration with explicit core and thread counts, and
    /// defaults for everything else.
    pub fn new(nr_aic: usize, nr_aiv: usize, sched_threads: usize) -> Self {
        Self {
            nr_aic,
            nr_aiv,
            sched_threads,
            ..Default::default()
        }
    }

    /// Loads a configuration from a YAML file. Unset keys keep their default
    /// values.
    pub fn from_file(path: &str) -> Result<Self, Fail> {
        let contents: String = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                let cause: String = format!("failed to read config file (path={:?}, error={})", path, e);
                error!("from_file(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        let docs: Vec<Yaml> = match YamlLoader::load_from_str(&contents) {
            Ok(docs) => docs,
            Err(e) => {
                let cause: String = format!("malformed config file (path={:?}, error={})", path, e);
                error!("from_file(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        let config_obj: &Yaml = match &docs[..] {
            [config_obj] => config_obj,
            _ => return Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        };

        let mut config: Config = Config::default();
        let section: &Yaml = &config_obj["npurt"];

        if let Some(nr_aic) = section["nr_aic"].as_i64() {
            config.nr_aic = nr_aic as usize;
        }
        if let Some(nr_aiv) = section["nr_aiv"].as_i64() {
            config.nr_aiv = nr_aiv as usize;
        }
        if let Some(sched_threads) = section["sched_threads"].as_i64() {
            config.sched_threads = sched_threads as usize;
        }
        if let Some(dir) = section["aic_kernel_dir"].as_str() {
            config.aic_kernel_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = section["aiv_kernel_dir"].as_str() {
            config.aiv_kernel_dir = Some(PathBuf::from(dir));
        }
        if let Some(device_index) = section["device_index"].as_i64() {
            config.device_index = device_index as usize;
        }

        config.apply_env();

        Ok(config)
    }

    /// Builds a configuration from the environment: `CONFIG_PATH` names a
    /// YAML file, `NPU_DEVICE` overrides the device index.
    pub fn from_env() -> Result<Self, Fail> {
        let mut config: Config = match env::var("CONFIG_PATH") {
            Ok(path) => Config::from_file(&path)?,
            Err(_) => Config::default(),
        };
        config.apply_env();

        Ok(config)
    }

    /// Applies environment overrides.
    fn apply_env(&mut self) {
        if let Ok(device) = env::var("NPU_DEVICE") {
            if let Ok(device_index) = device.parse::<usize>() {
                self.device_index = device_index;
            }
        }
    }

    /// Returns the total number of worker cores.
    pub fn core_num(&self) -> usize {
        self.nr_aic + self.nr_aiv
    }

    /// Validates the target configuration.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.core_num() == 0 {
            return Err(Fail::new(libc::EINVAL, "configuration has no worker cores"));
        }

        if self.core_num() > limits::MAX_WORKERS {
            let cause: String = format!(
                "too many worker cores (cores={}, max={})",
                self.core_num(),
                limits::MAX_WORKERS
            );
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        if !(1..=limits::MAX_SCHED_THREADS).contains(&self.sched_threads) {
            let cause: String = format!(
                "invalid scheduler thread count (threads={}, max={})",
                self.sched_threads,
                limits::MAX_SCHED_THREADS
            );
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        // Check that every scheduler thread's core slice fits the per-thread
        // bounds, so a bad layout is rejected before any kernel is launched.
        for t in 0..self.sched_threads {
            CoreAssignment::compute(t, self.sched_threads, self.nr_aic, self.nr_aiv)?;
        }

        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default trait implementation.
impl Default for Config {
    fn default() -> Self {
        Self {
            nr_aic: DEFAULT_NR_AIC,
            nr_aiv: DEFAULT_NR_AIV,
            sched_threads: DEFAULT_SCHED_THREADS,
            aic_kernel_dir: None,
            aiv_kernel_dir: None,
            device_index: 0,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
