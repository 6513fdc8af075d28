// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Structures
//======================================================================================================================

/// Diagnostics for one runtime, refreshed after every execution.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeStats {
    /// Tasks handed to worker cores.
    pub tasks_scheduled: i64,
    /// Tasks that reached completion.
    pub tasks_completed: i64,
    /// Completed tasks that ran on Cube cores.
    pub cube_tasks_executed: i64,
    /// Completed tasks that ran on Vector cores.
    pub vector_tasks_executed: i64,
    /// Wall-clock time of the last execution, in milliseconds.
    pub execution_time_ms: f64,
    /// Kernels registered in the runtime's registry.
    pub kernels_loaded: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated functions for runtime statistics.
impl RuntimeStats {
    /// Prints the target statistics to standard output.
    pub fn print(&self) {
        println!("=== runtime statistics ===");
        println!("tasks scheduled:   {}", self.tasks_scheduled);
        println!("tasks completed:   {}", self.tasks_completed);
        println!("cube tasks:        {}", self.cube_tasks_executed);
        println!("vector tasks:      {}", self.vector_tasks_executed);
        println!("execution time:    {:.2} ms", self.execution_time_ms);
        println!("kernels loaded:    {}", self.kernels_loaded);
        println!("==========================");
    }
}
