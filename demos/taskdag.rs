// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Runs a diamond-shaped task graph on the simulated device and prints the
//! result: a fill kernel feeds two vector scale kernels, whose halves are
//! reduced by a final cube kernel.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::npurt::{
    Config,
    CoreKind,
    Fail,
    NpuRuntime,
    TaskArg,
    TaskGraph,
};
use ::std::process;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of 32-bit lanes in the demo buffer.
const LANES: usize = 1024;

/// Function id of the fill kernel.
const FUNC_FILL: i32 = 0;

/// Function id of the scale kernel.
const FUNC_SCALE: i32 = 1;

/// Function id of the reduce kernel.
const FUNC_REDUCE: i32 = 2;

//======================================================================================================================
// Program Arguments
//======================================================================================================================

/// Program Arguments
#[derive(Debug)]
struct ProgramArguments {
    /// Number of Cube cores.
    nr_aic: usize,
    /// Number of Vector cores.
    nr_aiv: usize,
    /// Number of scheduler threads.
    sched_threads: usize,
}

impl ProgramArguments {
    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_about: &'static str) -> Result<Self, Fail> {
        let matches: ArgMatches = Command::new(app_name)
            .about(app_about)
            .arg(
                Arg::new("aic")
                    .long("aic")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .default_value("1")
                    .value_name("NUMBER")
                    .help("Sets number of Cube cores"),
            )
            .arg(
                Arg::new("aiv")
                    .long("aiv")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .default_value("2")
                    .value_name("NUMBER")
                    .help("Sets number of Vector cores"),
            )
            .arg(
                Arg::new("schedulers")
                    .long("schedulers")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .default_value("1")
                    .value_name("NUMBER")
                    .help("Sets number of scheduler threads"),
            )
            .get_matches();

        let nr_aic: usize = *matches
            .get_one::<usize>("aic")
            .ok_or_else(|| Fail::new(libc::EINVAL, "missing aic"))?;
        let nr_aiv: usize = *matches
            .get_one::<usize>("aiv")
            .ok_or_else(|| Fail::new(libc::EINVAL, "missing aiv"))?;
        let sched_threads: usize = *matches
            .get_one::<usize>("schedulers")
            .ok_or_else(|| Fail::new(libc::EINVAL, "missing schedulers"))?;

        Ok(Self {
            nr_aic,
            nr_aiv,
            sched_threads,
        })
    }
}

//======================================================================================================================
// Kernels
//======================================================================================================================

/// Fills a region of device memory with ones.
unsafe extern "C" fn fill_kernel(args: *const TaskArg, _num_args: i32) {
    let arg: TaskArg = *args;
    let base: *mut f32 = (arg.base + arg.offset) as *mut f32;
    for lane in 0..(arg.size as usize / 4) {
        *base.add(lane) = 1.0;
    }
}

/// Multiplies a region of device memory by three.
unsafe extern "C" fn scale_kernel(args: *const TaskArg, _num_args: i32) {
    let arg: TaskArg = *args;
    let base: *mut f32 = (arg.base + arg.offset) as *mut f32;
    for lane in 0..(arg.size as usize / 4) {
        *base.add(lane) *= 3.0;
    }
}

/// Sums a region of device memory into a result slot.
unsafe extern "C" fn reduce_kernel(args: *const TaskArg, num_args: i32) {
    assert!(num_args == 2);
    let src: TaskArg = *args;
    let dst: TaskArg = *args.add(1);

    let base: *const f32 = (src.base + src.offset) as *const f32;
    let mut sum: f32 = 0.0;
    for lane in 0..(src.size as usize / 4) {
        sum += *base.add(lane);
    }

    *((dst.base + dst.offset) as *mut f32) = sum;
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds and runs the diamond graph.
fn run(args: &ProgramArguments) -> Result<(), Fail> {
    let config: Config = Config::new(args.nr_aic, args.nr_aiv, args.sched_threads);
    let mut runtime: NpuRuntime = NpuRuntime::new(config);
    runtime.init()?;

    runtime.register_kernel_fn(FUNC_FILL, fill_kernel, CoreKind::Cube)?;
    runtime.register_kernel_fn(FUNC_SCALE, scale_kernel, CoreKind::Vector)?;
    runtime.register_kernel_fn(FUNC_REDUCE, reduce_kernel, CoreKind::Cube)?;

    // One buffer of lanes plus one result slot.
    let mut buffer = runtime.malloc(LANES * 4 + 4)?;
    runtime.copy_to_device(&mut buffer, &vec![0u8; LANES * 4 + 4])?;

    let whole: TaskArg = TaskArg {
        base: buffer.addr(),
        offset: 0,
        size: (LANES * 4) as u64,
    };
    let lower: TaskArg = TaskArg {
        base: buffer.addr(),
        offset: 0,
        size: (LANES * 2) as u64,
    };
    let upper: TaskArg = TaskArg {
        base: buffer.addr(),
        offset: (LANES * 2) as u64,
        size: (LANES * 2) as u64,
    };
    let result: TaskArg = TaskArg {
        base: buffer.addr(),
        offset: (LANES * 4) as u64,
        size: 4,
    };

    let mut graph: Box<TaskGraph> = TaskGraph::new()?;
    let t0: i32 = graph.add_task(FUNC_FILL, "fill", CoreKind::Cube, &[whole])?;
    let t1: i32 = graph.add_task(FUNC_SCALE, "scale_lower", CoreKind::Vector, &[lower])?;
    let t2: i32 = graph.add_task(FUNC_SCALE, "scale_upper", CoreKind::Vector, &[upper])?;
    let t3: i32 = graph.add_task(FUNC_REDUCE, "reduce", CoreKind::Cube, &[whole, result])?;
    graph.add_edge(t0, t1)?;
    graph.add_edge(t0, t2)?;
    graph.add_edge(t1, t3)?;
    graph.add_edge(t2, t3)?;

    runtime.execute(&graph)?;

    let mut out: Vec<u8> = vec![0u8; LANES * 4 + 4];
    runtime.copy_from_device(&mut out, &buffer)?;
    let sum: f32 = f32::from_ne_bytes([
        out[LANES * 4],
        out[LANES * 4 + 1],
        out[LANES * 4 + 2],
        out[LANES * 4 + 3],
    ]);
    println!("reduce({} lanes x 1.0 x 3.0) = {}", LANES, sum);

    runtime.print_stats();
    runtime.finalize()?;

    Ok(())
}

fn main() {
    let args: ProgramArguments = match ProgramArguments::new("taskdag", "Runs a diamond task graph on the NPU runtime.")
    {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(e.errno);
        },
    };

    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        process::exit(e.errno);
    }
}
