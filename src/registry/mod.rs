// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    graph::CoreKind,
    runtime::{
        fail::Fail,
        limits,
        memory::DeviceBuffer,
    },
    worker::KernelFn,
};
use ::std::{
    fs,
    path::Path,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One registered kernel: the device address of its entry point and the core
/// kind it was compiled for.
#[derive(Clone, Copy, Debug)]
struct KernelEntry {
    /// Device address of the kernel entry point.
    addr: u64,
    /// Kind of core this kernel runs on.
    core_kind: CoreKind,
}

/// Fixed-size table mapping `func_id` to a kernel entry point.
///
/// Populated once at runtime initialization and read-only during execution;
/// lookup is O(1). Kernels loaded from binary files are staged into device
/// memory owned by the registry.
pub struct KernelRegistry {
    /// Entry table, indexed by `func_id`.
    entries: [Option<KernelEntry>; limits::MAX_FUNC_IDS],
    /// Device copies of kernel binaries loaded from files.
    blobs: Vec<DeviceBuffer>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for the kernel registry.
impl KernelRegistry {
    /// Creates an empty kernel registry.
    pub fn new() -> Self {
        Self {
            entries: [None; limits::MAX_FUNC_IDS],
            blobs: Vec::new(),
        }
    }

    /// Registers an in-process kernel entry point for `func_id`.
    /// Re-registering a `func_id` replaces the previous entry.
    pub fn register_fn(&mut self, func_id: i32, kernel: KernelFn, core_kind: CoreKind) -> Result<(), Fail> {
        let slot: usize = Self::slot(func_id)?;
        self.entries[slot] = Some(KernelEntry {
            addr: kernel as usize as u64,
            core_kind,
        });
        trace!("register_fn(): func_id={} kind={:?}", func_id, core_kind);

        Ok(())
    }

    /// Loads a compiled kernel binary from a file, stages it into device
    /// memory and registers its base address for `func_id`.
    pub fn load_binary(&mut self, func_id: i32, path: &Path, core_kind: CoreKind) -> Result<(), Fail> {
        let slot: usize = Self::slot(func_id)?;

        let bytes: Vec<u8> = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let cause: String = format!("failed to read kernel binary (path={:?}, error={})", path, e);
                error!("load_binary(): {}", cause);
                return Err(Fail::new(libc::ENOEXEC, &cause));
            },
        };

        if bytes.is_empty() {
            let cause: String = format!("kernel binary is empty (path={:?})", path);
            error!("load_binary(): {}", cause);
            return Err(Fail::new(libc::ENOEXEC, &cause));
        }

        let mut blob: DeviceBuffer = DeviceBuffer::new(bytes.len())?;
        blob.copy_in(0, &bytes)?;

        self.entries[slot] = Some(KernelEntry {
            addr: blob.addr(),
            core_kind,
        });
        self.blobs.push(blob);
        info!("load_binary(): func_id={} path={:?} ({} bytes)", func_id, path, bytes.len());

        Ok(())
    }

    /// Looks up the entry point and core kind registered for `func_id`.
    pub fn lookup(&self, func_id: i32) -> Result<(u64, CoreKind), Fail> {
        let slot: usize = Self::slot(func_id)?;
        match self.entries[slot] {
            Some(entry) => Ok((entry.addr, entry.core_kind)),
            None => {
                let cause: String = format!("no kernel registered (func_id={})", func_id);
                error!("lookup(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Returns the number of registered kernels.
    pub fn count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// Validates a function identifier and converts it to a table slot.
    fn slot(func_id: i32) -> Result<usize, Fail> {
        if func_id < 0 || func_id as usize >= limits::MAX_FUNC_IDS {
            let cause: String = format!("invalid function id (func_id={}, max={})", func_id, limits::MAX_FUNC_IDS);
            error!("slot(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        Ok(func_id as usize)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default trait implementation.
impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod test {
    use super::KernelRegistry;
    use crate::graph::{
        CoreKind,
        TaskArg,
    };
    use ::std::{
        io::Write,
        path::PathBuf,
    };

    /// A kernel that does nothing.
    unsafe extern "C" fn noop_kernel(_args: *const TaskArg, _num_args: i32) {}

    /// Tests if registration and lookup round-trip.
    #[test]
    fn register_lookup() {
        let mut registry: KernelRegistry = KernelRegistry::new();
        registry.register_fn(7, noop_kernel, CoreKind::Vector).unwrap();

        let (addr, kind): (u64, CoreKind) = registry.lookup(7).unwrap();
        assert!(addr == noop_kernel as usize as u64);
        assert!(kind == CoreKind::Vector);
        assert!(registry.count() == 1);
    }

    /// Tests if looking up an unregistered function fails.
    #[test]
    fn lookup_missing() {
        let registry: KernelRegistry = KernelRegistry::new();
        match registry.lookup(0) {
            Ok(_) => panic!("looking up an unregistered function should fail"),
            Err(e) => assert!(e.errno == libc::EINVAL),
        };
    }

    /// Tests if an out-of-range function id is rejected.
    #[test]
    fn bad_func_id() {
        let mut registry: KernelRegistry = KernelRegistry::new();
        match registry.register_fn(4096, noop_kernel, CoreKind::Cube) {
            Ok(_) => panic!("registering an out-of-range function id should fail"),
            Err(e) => assert!(e.errno == libc::EINVAL),
        };
    }

    /// Tests if re-registering a function id replaces the entry.
    #[test]
    fn replace_entry() {
        let mut registry: KernelRegistry = KernelRegistry::new();
        registry.register_fn(3, noop_kernel, CoreKind::Cube).unwrap();
        registry.register_fn(3, noop_kernel, CoreKind::Vector).unwrap();

        let (_, kind): (u64, CoreKind) = registry.lookup(3).unwrap();
        assert!(kind == CoreKind::Vector);
        assert!(registry.count() == 1);
    }

    /// Tests if a kernel binary is staged to device memory and registered.
    #[test]
    fn load_binary() {
        let path: PathBuf = std::env::temp_dir().join("npurt-test-kernel.o");
        let payload: &[u8] = b"\x7fELF-not-really";
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(payload).unwrap();
        drop(file);

        let mut registry: KernelRegistry = KernelRegistry::new();
        registry.load_binary(9, &path, CoreKind::Cube).unwrap();

        let (addr, _): (u64, CoreKind) = registry.lookup(9).unwrap();
        assert!(addr != 0);

        // The staged copy matches the file contents.
        let staged: &[u8] = unsafe { std::slice::from_raw_parts(addr as *const u8, payload.len()) };
        assert!(staged == payload);

        std::fs::remove_file(&path).unwrap();
    }

    /// Tests if loading a missing kernel binary fails.
    #[test]
    fn load_missing_binary() {
        let mut registry: KernelRegistry = KernelRegistry::new();
        let path: PathBuf = PathBuf::from("/nonexistent/kernel.o");

        match registry.load_binary(1, &path, CoreKind::Cube) {
            Ok(_) => panic!("loading a missing kernel binary should fail"),
            Err(e) => assert!(e.errno == libc::ENOEXEC),
        };
    }
}
