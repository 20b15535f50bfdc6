use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;

use clap::ArgAction;
use clap::Parser;

use jitdis::Addr;
use jitdis::Pid;


/// Parse a PID from a string.
fn parse_pid(s: &str) -> Result<Pid> {
    let pid = if let Some(s) = s.strip_prefix("0x") {
        u32::from_str_radix(s, 16)
    } else {
        s.parse::<u32>()
    }
    .with_context(|| format!("failed to parse PID: {s}"))?;

    Ok(Pid::from(pid))
}

/// Parse an address from a string.
fn parse_addr(s: &str) -> Result<Addr> {
    // In our world addresses are always represented in hex, with or
    // without 0x prefix.
    Addr::from_str_radix(s.trim_start_matches("0x"), 16)
        .with_context(|| format!("failed to parse address: {s}"))
}


/// Disassemble the code of a running process, annotated with symbols
/// from its modules and its JIT runtime.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// The ID of the process to inspect.
    #[arg(short, long, value_parser = parse_pid)]
    pub pid: Pid,
    /// The start address of the range to disassemble, in hex.
    ///
    /// Without a range, all runtime generated symbols are disassembled
    /// instead.
    #[arg(long, value_parser = parse_addr, requires = "end")]
    pub start: Option<Addr>,
    /// The end address of the range to disassemble, in hex, exclusive.
    #[arg(long, value_parser = parse_addr, requires = "start")]
    pub end: Option<Addr>,
    /// Perf map files with runtime generated symbols; `-` reads from
    /// stdin.
    ///
    /// When none is given, /tmp/perf-<PID>.map is used if it exists.
    pub maps: Vec<PathBuf>,
    /// Increase verbosity (can be supplied multiple times).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}
