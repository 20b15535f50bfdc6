use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io::Write;
use std::rc::Rc;

use iced_x86::Decoder;
use iced_x86::DecoderOptions;
use iced_x86::Formatter as _;
use iced_x86::Instruction;
use iced_x86::IntelFormatter;
use iced_x86::SymbolResolver;
use iced_x86::SymbolResult;

use tracing::warn;

use crate::process::ProcessIndex;
use crate::remote::RemoteMemory;
use crate::Addr;
use crate::Error;
use crate::Result;

/// We only handle 64 bit x86 targets.
const BITNESS: u32 = 64;


/// A symbol resolver handing the process index to the instruction
/// formatter, so that branch and memory operands are annotated with the
/// symbols they target.
struct IndexSymbols {
    index: Rc<ProcessIndex>,
}

impl SymbolResolver for IndexSymbols {
    fn symbol(
        &mut self,
        _instruction: &Instruction,
        _operand: u32,
        _instruction_operand: Option<u32>,
        address: u64,
        _address_size: u32,
    ) -> Option<SymbolResult<'_>> {
        let sym = self.index.find_sym(address)?;
        // The formatter renders `name+offset` itself when the symbol
        // starts before the referenced address.
        Some(SymbolResult::with_str(sym.addr, &sym.name))
    }
}


/// Decode and format the provided instruction bytes, assumed to reside
/// at `ip` in the target's address space.
///
/// Decoding stops at the first invalid instruction.
fn disassemble<W>(formatter: &mut IntelFormatter, writer: &mut W, code: &[u8], ip: Addr) -> Result<()>
where
    W: Write,
{
    let mut decoder = Decoder::with_ip(BITNESS, code, ip, DecoderOptions::NONE);
    let mut instruction = Instruction::default();
    let mut output = String::new();

    while decoder.can_decode() {
        let () = decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            break
        }
        let () = output.clear();
        let () = formatter.format(&instruction, &mut output);
        writeln!(writer, "{:016x}  {output}", instruction.ip())?;
    }
    Ok(())
}


/// A driver that reads code out of a target process and renders it as
/// annotated assembly.
pub struct Disassembler {
    /// The symbol index, shared with the formatter's resolver.
    index: Rc<ProcessIndex>,
    /// The reader for the target's address space.
    remote: RemoteMemory,
    formatter: IntelFormatter,
}

impl Debug for Disassembler {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Disassembler")
            .field("index", &self.index)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Disassembler {
    /// Create a disassembler for the process described by `index`.
    pub fn new(index: Rc<ProcessIndex>) -> Self {
        let resolver = Box::new(IndexSymbols {
            index: Rc::clone(&index),
        });
        let mut formatter = IntelFormatter::with_options(Some(resolver), None);
        let () = formatter.options_mut().set_uppercase_hex(false);
        let remote = RemoteMemory::new(index.pid());
        Self {
            index,
            remote,
            formatter,
        }
    }

    /// Disassemble the instructions in `[start, end)` of the target's
    /// address space, writing the rendition to `writer`.
    pub fn disassemble_range<W>(&mut self, writer: &mut W, start: Addr, end: Addr) -> Result<()>
    where
        W: Write,
    {
        let len = end
            .checked_sub(start)
            .ok_or_else(|| Error::with_invalid_input("range end precedes its start"))?;
        if let Some(sym) = self.index.find_sym(start) {
            if sym.addr == start {
                writeln!(writer, "{start:016x} <{}>", sym.name)?;
            } else {
                writeln!(writer, "{start:016x} <{}+{:#x}>", sym.name, start - sym.addr)?;
            }
        }
        let code = self.remote.read(start, len as usize)?;
        disassemble(&mut self.formatter, writer, &code, start)
    }

    /// Disassemble every runtime generated symbol known to the index,
    /// each preceded by a `<name>` header and followed by a blank line.
    ///
    /// Symbols whose code cannot be read, e.g., because the JIT engine
    /// discarded it after emitting the map entry, are reported and
    /// omitted from the output entirely.
    pub fn disassemble_runtime_syms<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        let index = Rc::clone(&self.index);
        for sym in index.runtime_syms() {
            // Read first; a symbol that cannot be read must not leave a
            // stray header in the output.
            let code = match self.remote.read(sym.addr, sym.size as usize) {
                Ok(code) => code,
                Err(err) => {
                    warn!("failed to read code of `{}`: {err}", sym.name);
                    continue
                }
            };
            writeln!(writer, "{:016x} <{}>", sym.addr, sym.name)?;
            let () = disassemble(&mut self.formatter, writer, &code, sym.addr)?;
            writeln!(writer)?;
        }
        Ok(())
    }
}
