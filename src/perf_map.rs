use std::fs::File;
use std::io::BufRead as _;
use std::io::BufReader;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use tracing::trace;

use crate::Addr;
use crate::ErrorExt as _;
use crate::Pid;
use crate::Result;
use crate::Sym;
use crate::SymMap;


/// Parse a single perf map line.
///
/// Lines have the shape
/// ```text
/// START SIZE NAME
/// ```
/// with `START` and `SIZE` in hexadecimal (an optional `0x` prefix is
/// accepted) and `NAME` extending to the end of the line, spaces
/// included.
fn parse_line(line: &str) -> Option<(Addr, Sym)> {
    fn parse_hex(s: &str) -> Option<u64> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(s, 16).ok()
    }

    let (start, rest) = line.split_once(char::is_whitespace)?;
    let (size, name) = rest.trim_start().split_once(char::is_whitespace)?;
    let addr = parse_hex(start)?;
    let size = parse_hex(size)?;
    let name = name.trim();
    if name.is_empty() {
        return None
    }

    let sym = Sym {
        addr,
        size,
        name: Box::from(name),
        code: true,
    };
    Some((addr, sym))
}


/// A set of runtime generated symbols, typically emitted by a JIT
/// compiler into a perf map file (`/tmp/perf-<PID>.map`).
///
/// Entries take precedence over module symbols when both cover an
/// address, because JIT engines routinely place generated code into
/// regions that the memory map still attributes to some mapped file.
#[derive(Debug, Default)]
pub struct PerfMap {
    /// All runtime symbols, keyed by start address. Later additions for
    /// an already known address replace the earlier entry.
    syms: SymMap,
}

impl PerfMap {
    /// Create an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventional perf map path for the given process.
    pub fn default_path(pid: Pid) -> PathBuf {
        PathBuf::from(format!("/tmp/perf-{}.map", pid.resolve()))
    }

    /// Read perf map entries from `reader`, merging them into this
    /// overlay.
    ///
    /// Lines that do not parse are skipped; a JIT engine may still be
    /// appending to the file while we read it, so a truncated trailing
    /// line is expected.
    pub fn extend_from_reader<R>(&mut self, reader: R) -> Result<()>
    where
        R: Read,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            let () = line.clear();
            if reader.read_line(&mut line)? == 0 {
                break Ok(())
            }
            match parse_line(line.trim()) {
                Some((addr, sym)) => {
                    let _prev = self.syms.insert(addr, sym);
                }
                None => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        trace!("ignoring unrecognized perf map line: {trimmed}");
                    }
                }
            }
        }
    }

    /// Load the perf map file at `path`, merging its entries into this
    /// overlay.
    pub fn load<P>(&mut self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open perf map `{}`", path.display()))?;
        self.extend_from_reader(file)
    }

    /// Look up the symbol starting at exactly `addr`.
    pub fn find_sym(&self, addr: Addr) -> Option<&Sym> {
        self.syms.get(&addr)
    }

    /// Iterate over all symbols in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Sym> {
        self.syms.values()
    }

    /// The number of symbols in the overlay.
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    /// Whether the overlay contains no symbols.
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }
}
