//! dbiprofctl - dbiprof Trace Replay Driver
//!
//! Drives the profiling core from a recorded event trace in place of a
//! live instrumentation runtime.
//! Usage: dbiprofctl [OPTIONS] <COMMAND> [ARGS]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;

use dbiprof::{trace, Session, SessionConfig};

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let mut out_dir = PathBuf::from(".");
    let mut emit_blocks = true;

    // Parse global options and command
    let mut i = 1;
    while i < args.len() && args[i].starts_with('-') {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-V" | "--version" => {
                println!("dbiprofctl {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "-o" | "--out-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Missing argument for {}", args[i - 1]);
                    return ExitCode::from(1);
                }
                out_dir = PathBuf::from(&args[i]);
            }
            "--no-blocks" => {
                emit_blocks = false;
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                return ExitCode::from(1);
            }
        }
        i += 1;
    }

    if i >= args.len() {
        print_usage();
        return ExitCode::from(1);
    }

    let command = &args[i];
    let cmd_args: Vec<&str> = args[i + 1..].iter().map(|s| s.as_str()).collect();

    let result = match command.as_str() {
        "replay" => {
            if cmd_args.len() != 1 {
                eprintln!("Usage: dbiprofctl replay <trace.jsonl>");
                return ExitCode::from(1);
            }
            run_replay(Path::new(cmd_args[0]), out_dir, emit_blocks)
        }
        "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run_replay(trace_path: &Path, out_dir: PathBuf, emit_blocks: bool) -> anyhow::Result<()> {
    let config = SessionConfig {
        out_dir,
        emit_block_report: emit_blocks,
        ..SessionConfig::default()
    };
    let mut session = Session::new(config);

    let summary = trace::replay_path(trace_path, &mut session)
        .with_context(|| format!("replaying {}", trace_path.display()))?;

    println!(
        "{} events applied, {} skipped",
        summary.events, summary.skipped
    );
    match summary.exit_code {
        Some(code) => {
            println!(
                "target exited with code {}; reports written to {}",
                code,
                session.config().out_dir.display()
            );
        }
        None => {
            println!("trace ended without an exit event; no reports written");
            return Ok(());
        }
    }

    let hottest = session.registry().hot_routines(5);
    if !hottest.is_empty() {
        println!("hottest routines:");
        for (id, count) in hottest {
            let routine = session.registry().routine(id);
            println!("  {:>12}  {}", count, routine.name);
        }
    }

    Ok(())
}

fn print_usage() {
    println!("dbiprofctl - dbiprof trace replay driver");
    println!();
    println!("USAGE:");
    println!("    dbiprofctl [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help             Show this help message");
    println!("    -V, --version          Show version information");
    println!("    -o, --out-dir <DIR>    Directory for report files (default: .)");
    println!("    --no-blocks            Skip the block-level report");
    println!();
    println!("COMMANDS:");
    println!("    replay <trace.jsonl>   Replay a recorded event trace");
    println!("    help                   Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    dbiprofctl replay run.jsonl");
    println!("    dbiprofctl -o /tmp/reports replay run.jsonl");
    println!("    RUST_LOG=debug dbiprofctl replay run.jsonl");
}
