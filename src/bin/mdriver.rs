//! Replays allocation traces and reports the utilization each one reaches.
use std::{env::args, process::ExitCode};

use mmdriver::{replay, ReplayOptions, ReplayReport, Trace};
use salloc::{HeapAllocator, ImplicitAllocator, MemRegion, SegregatedAllocator};

const USAGE: &str = "usage: mdriver [-v] [-c] [-i] <trace>...
  -v  log allocator activity
  -c  check the heap after every request
  -i  use the implicit free list allocator";

#[derive(Debug, Default)]
struct Args {
    verbose: bool,
    check: bool,
    implicit: bool,
    traces: Vec<String>,
}

fn parse_args() -> Option<Args> {
    let mut parsed = Args::default();
    for arg in args().skip(1) {
        match arg.as_str() {
            "-v" => parsed.verbose = true,
            "-c" => parsed.check = true,
            "-i" => parsed.implicit = true,
            "-h" | "--help" => return None,
            flag if flag.starts_with('-') => {
                eprintln!("Unknown flag {flag}");
                return None;
            }
            _ => parsed.traces.push(arg),
        }
    }
    (!parsed.traces.is_empty()).then_some(parsed)
}

fn run<A: HeapAllocator>(trace: &Trace, mut allocator: A, options: ReplayOptions) -> bool {
    match replay(trace, &mut allocator, options) {
        Ok(ReplayReport {
            ops,
            peak_payload,
            heap_extent,
            utilization,
        }) => {
            println!(
                "{:<24} {:>8} {:>10} {:>10} {:>6.1}%",
                trace.name,
                ops,
                peak_payload,
                heap_extent,
                utilization * 100.0
            );
            true
        }
        Err(err) => {
            eprintln!("{}: {err}", trace.name);
            false
        }
    }
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let level = if args.verbose { "debug,salloc=trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    if args.verbose {
        salloc::enable_logging();
    }
    let options = ReplayOptions {
        check_each_step: args.check,
    };

    println!(
        "{:<24} {:>8} {:>10} {:>10} {:>7}",
        "trace", "ops", "peak", "heap", "util"
    );
    let mut ok = true;
    for path in &args.traces {
        let trace = match Trace::load(path) {
            Ok(trace) => trace,
            Err(err) => {
                eprintln!("{path}: {err}");
                ok = false;
                continue;
            }
        };
        let passed = if args.implicit {
            ImplicitAllocator::init(MemRegion::new())
                .map(|allocator| run(&trace, allocator, options))
        } else {
            SegregatedAllocator::init(MemRegion::new())
                .map(|allocator| run(&trace, allocator, options))
        };
        match passed {
            Ok(passed) => ok &= passed,
            Err(err) => {
                eprintln!("{path}: failed to initialize heap: {err}");
                ok = false;
            }
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
