#![allow(clippy::let_and_return, clippy::let_unit_value)]

mod args;

use std::io;
use std::io::Write as _;
use std::rc::Rc;

use anyhow::Context as _;
use anyhow::Result;

use clap::Parser as _;

use jitdis::Disassembler;
use jitdis::PerfMap;
use jitdis::ProcessIndex;

use tracing::subscriber::set_global_default as set_global_subscriber;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::FmtSubscriber;


/// Assemble the runtime symbol overlay from the provided map files.
///
/// Explicitly named files have to load; the conventional default file
/// is used opportunistically.
fn load_overlay(args: &args::Args) -> Result<PerfMap> {
    let mut overlay = PerfMap::new();
    if args.maps.is_empty() {
        let path = PerfMap::default_path(args.pid);
        if path.exists() {
            if let Err(err) = overlay.load(&path) {
                warn!("failed to load `{}`: {err}", path.display());
            }
        }
    } else {
        for path in &args.maps {
            if path.as_os_str() == "-" {
                let () = overlay
                    .extend_from_reader(io::stdin().lock())
                    .context("failed to read perf map from stdin")?;
            } else {
                let () = overlay.load(path)?;
            }
        }
    }
    Ok(overlay)
}

fn run(args: args::Args) -> Result<()> {
    let overlay = load_overlay(&args)?;
    let index = ProcessIndex::load(args.pid, overlay)
        .with_context(|| format!("failed to index process {}", args.pid))?;
    let mut disasm = Disassembler::new(Rc::new(index));

    let stdout = io::stdout();
    let mut writer = io::BufWriter::new(stdout.lock());
    match (args.start, args.end) {
        (Some(start), Some(end)) => {
            let () = disasm
                .disassemble_range(&mut writer, start, end)
                .with_context(|| format!("failed to disassemble [{start:#x}, {end:#x})"))?;
        }
        _ => {
            let () = disasm
                .disassemble_runtime_syms(&mut writer)
                .context("failed to disassemble runtime generated symbols")?;
        }
    }
    let () = writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = args::Args::parse();
    let level = match args.verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Diagnostics go to stderr; stdout carries only the disassembly.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_span_events(FmtSpan::FULL)
        .with_timer(SystemTime)
        .with_writer(io::stderr)
        .finish();

    let () =
        set_global_subscriber(subscriber).with_context(|| "failed to set tracing subscriber")?;

    run(args)
}
