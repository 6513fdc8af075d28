// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use self::common::{
    add_record_task,
    do_runtime,
    ExecutionLog,
    Record,
};
use ::anyhow::{
    ensure,
    Result,
};
use ::npurt::{
    CoreKind,
    NpuRuntime,
    TaskGraph,
};
use ::rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

/// Checks the handshake-closure invariant: after an execution every cell has
/// been quit, its doorbell is idle and its task slot is retired.
fn check_closed(runtime: &NpuRuntime) -> Result<()> {
    for state in runtime.core_states()? {
        ensure!(state.control == 1, "cell was not quit");
        ensure!(state.task_status == 0, "cell doorbell is not idle");
        ensure!(state.task_addr == 0, "cell task slot was not retired");
    }
    Ok(())
}

/// Checks the at-most-once invariant: every task in the graph was recorded
/// exactly once.
fn check_exactly_once(records: &[Record], graph: &TaskGraph) -> Result<()> {
    ensure!(records.len() == graph.task_count() as usize, "completion count mismatch");
    for task in graph.tasks() {
        let runs: usize = records.iter().filter(|r| r.task_id == task.task_id()).count();
        ensure!(runs == 1, "task {} ran {} times", task.task_id(), runs);
    }
    Ok(())
}

/// Checks the kind-affinity invariant: Cube tasks ran on cores below
/// `nr_aic`, Vector tasks on cores at or above it.
fn check_affinity(records: &[Record], graph: &TaskGraph, nr_aic: usize) -> Result<()> {
    for record in records {
        let kind: CoreKind = graph.get(record.task_id)?.core_kind();
        match kind {
            CoreKind::Cube => ensure!(
                record.core_index < nr_aic,
                "cube task {} ran on vector core {}",
                record.task_id,
                record.core_index
            ),
            CoreKind::Vector => ensure!(
                record.core_index >= nr_aic,
                "vector task {} ran on cube core {}",
                record.task_id,
                record.core_index
            ),
        }
    }
    Ok(())
}

/// Checks the DAG-safety invariant: every edge source completed before its
/// destination.
fn check_dag_order(log: &ExecutionLog, graph: &TaskGraph) -> Result<()> {
    for task in graph.tasks() {
        for &succ in task.fanout() {
            ensure!(
                log.position(task.task_id()) < log.position(succ),
                "task {} completed after its successor {}",
                task.task_id(),
                succ
            );
        }
    }
    Ok(())
}

//======================================================================================================================
// Integration Tests
//======================================================================================================================

/// S1: a three-stage Cube pipeline on a single Cube core runs in order.
#[test]
fn s1_pipeline() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 0, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let t0: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    let t1: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    let t2: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    graph.add_edge(t0, t1)?;
    graph.add_edge(t1, t2)?;

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    ensure!(runtime.get_stats().tasks_completed == 3, "expected three completions");
    let order: Vec<i32> = records.iter().map(|r| r.task_id).collect();
    ensure!(order == vec![t0, t1, t2], "pipeline ran out of order: {:?}", order);
    ensure!(records.iter().all(|r| r.core_index == 0), "pipeline left core 0");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// S2: in a diamond, the head runs first, both Vector arms run before the
/// tail, and everything completes.
#[test]
fn s2_diamond() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 2, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let t0: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    let t1: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
    let t2: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
    let t3: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    graph.add_edge(t0, t1)?;
    graph.add_edge(t0, t2)?;
    graph.add_edge(t1, t3)?;
    graph.add_edge(t2, t3)?;

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    check_exactly_once(&records, &graph)?;
    check_affinity(&records, &graph, 1)?;
    check_dag_order(&log, &graph)?;
    ensure!(log.position(t3) == 3, "tail did not complete last");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// S3: a wide Vector fan-out drains on two Vector cores, in any order, after
/// the Cube head.
#[test]
fn s3_wide_fanout() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 2, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let head: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    for _ in 0..8 {
        let leaf: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
        graph.add_edge(head, leaf)?;
    }

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    check_exactly_once(&records, &graph)?;
    check_affinity(&records, &graph, 1)?;
    ensure!(log.position(head) == 0, "fan-out head did not complete first");
    ensure!(runtime.get_stats().vector_tasks_executed == 8, "expected eight vector tasks");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// S4: independent Cube and Vector batches drain on their own cores without
/// starving each other.
#[test]
fn s4_kind_starvation_guard() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 2, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    for _ in 0..10 {
        add_record_task(&mut graph, CoreKind::Cube, &log);
    }
    for _ in 0..10 {
        add_record_task(&mut graph, CoreKind::Vector, &log);
    }

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    check_exactly_once(&records, &graph)?;
    check_affinity(&records, &graph, 1)?;

    let stats = runtime.get_stats();
    ensure!(stats.cube_tasks_executed == 10, "expected ten cube tasks");
    ensure!(stats.vector_tasks_executed == 10, "expected ten vector tasks");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// S5: sixty mixed tasks over three scheduler threads, each owning one Cube
/// and two Vector cores, all complete.
#[test]
fn s5_multi_scheduler_balance() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(3, 6, 3);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    for i in 0..60 {
        let kind: CoreKind = if i % 2 == 0 { CoreKind::Cube } else { CoreKind::Vector };
        add_record_task(&mut graph, kind, &log);
    }

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    check_exactly_once(&records, &graph)?;
    check_affinity(&records, &graph, 3)?;
    ensure!(runtime.get_stats().tasks_completed == 60, "expected sixty completions");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// S6: re-running the diamond on the same runtime starts from clean counters
/// and yields an identical result.
#[test]
fn s6_reset() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 2, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let t0: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    let t1: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
    let t2: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
    let t3: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    graph.add_edge(t0, t1)?;
    graph.add_edge(t0, t2)?;
    graph.add_edge(t1, t3)?;
    graph.add_edge(t2, t3)?;

    runtime.execute(&graph)?;
    let first = runtime.get_stats();
    check_dag_order(&log, &graph)?;

    log.clear();
    runtime.execute(&graph)?;
    let second = runtime.get_stats();
    check_dag_order(&log, &graph)?;

    ensure!(first.tasks_completed == 4, "first run should complete four tasks");
    ensure!(second.tasks_completed == first.tasks_completed, "second run diverged");
    ensure!(second.cube_tasks_executed == first.cube_tasks_executed, "cube counts diverged");
    ensure!(second.vector_tasks_executed == first.vector_tasks_executed, "vector counts diverged");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// An empty graph completes immediately, and the handshake still closes out.
#[test]
fn empty_graph() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 1, 1);

    let graph: Box<TaskGraph> = TaskGraph::new()?;
    runtime.execute(&graph)?;

    ensure!(runtime.get_stats().tasks_completed == 0, "empty graph completed tasks");
    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// A single initially ready task runs on exactly one core of its kind.
#[test]
fn single_task() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 1, 1);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    add_record_task(&mut graph, CoreKind::Vector, &log);

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    ensure!(records.len() == 1, "expected exactly one completion");
    ensure!(records[0].core_index == 1, "vector task did not run on the vector core");

    let stats = runtime.get_stats();
    ensure!(stats.vector_tasks_executed == 1, "expected one vector task");
    ensure!(stats.cube_tasks_executed == 0, "expected no cube tasks");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}

/// Staging a graph to device memory and copying it back is byte-exact.
#[test]
fn staging_round_trip() -> Result<()> {
    let mut runtime: NpuRuntime = do_runtime(1, 1, 1);

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let log: Box<ExecutionLog> = ExecutionLog::new();
    let t0: i32 = add_record_task(&mut graph, CoreKind::Cube, &log);
    let t1: i32 = add_record_task(&mut graph, CoreKind::Vector, &log);
    graph.add_edge(t0, t1)?;

    let bytes: &[u8] = graph.as_bytes();
    let mut staged = runtime.malloc(bytes.len())?;
    runtime.copy_to_device(&mut staged, bytes)?;

    let mut round_trip: Vec<u8> = vec![0u8; bytes.len()];
    runtime.copy_from_device(&mut round_trip, &staged)?;

    ensure!(round_trip == bytes, "staged graph does not round-trip bytewise");
    runtime.finalize()?;
    Ok(())
}

/// A seeded random layered DAG keeps every invariant: DAG safety, at-most-once
/// dispatch, kind affinity and full completion.
#[test]
fn random_layered_dag() -> Result<()> {
    const LAYERS: [usize; 4] = [8, 10, 10, 12];
    let mut rng: StdRng = StdRng::seed_from_u64(7);

    let mut runtime: NpuRuntime = do_runtime(2, 4, 2);
    let log: Box<ExecutionLog> = ExecutionLog::new();

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let mut previous_layer: Vec<i32> = Vec::new();
    for &width in LAYERS.iter() {
        let mut layer: Vec<i32> = Vec::new();
        for _ in 0..width {
            let kind: CoreKind = if rng.gen_bool(0.4) { CoreKind::Cube } else { CoreKind::Vector };
            let task_id: i32 = add_record_task(&mut graph, kind, &log);
            for &parent in previous_layer.iter() {
                if rng.gen_bool(0.3) {
                    graph.add_edge(parent, task_id)?;
                }
            }
            layer.push(task_id);
        }
        previous_layer = layer;
    }

    runtime.execute(&graph)?;

    let records: Vec<Record> = log.records();
    check_exactly_once(&records, &graph)?;
    check_affinity(&records, &graph, 2)?;
    check_dag_order(&log, &graph)?;

    let total: usize = LAYERS.iter().sum();
    ensure!(runtime.get_stats().tasks_completed == total as i64, "incomplete execution");

    check_closed(&runtime)?;
    runtime.finalize()?;
    Ok(())
}
