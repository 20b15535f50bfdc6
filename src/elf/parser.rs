use std::mem::size_of;
use std::path::Path;
use std::path::PathBuf;

use tracing::trace;

use crate::mmap::Mmap;
use crate::util::ReadRaw as _;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;
use crate::Sym;
use crate::SymMap;

use super::types::Elf32_Ehdr;
use super::types::Elf32_Shdr;
use super::types::Elf32_Sym;
use super::types::Elf64_Ehdr;
use super::types::Elf64_Shdr;
use super::types::Elf64_Sym;
use super::types::EI_CLASS;
use super::types::ELFCLASS32;
use super::types::ELFCLASS64;
use super::types::ELFMAG;
use super::types::ET_DYN;
use super::types::ET_EXEC;
use super::types::SHN_ABS;
use super::types::SHN_UNDEF;
use super::types::SHT_DYNSYM;
use super::types::SHT_SYMTAB;
use super::types::STT_FUNC;


/// The word size of an ELF object, decided once when the header is
/// read. All subsequent accesses work on data normalized to 64 bit
/// quantities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElfClass {
    Bits32,
    Bits64,
}

/// An ELF header, normalized across word sizes.
#[derive(Debug)]
struct Ehdr {
    class: ElfClass,
    type_: u16,
    shoff: u64,
    shnum: usize,
}

/// A section header, normalized across word sizes.
#[derive(Debug)]
struct Shdr {
    type_: u32,
    offset: u64,
    size: u64,
    link: u32,
}

/// A symbol table entry, normalized across word sizes.
#[derive(Debug)]
struct SymEntry {
    name: u32,
    info: u8,
    shndx: u16,
    value: u64,
    size: u64,
}


fn parse_ehdr(data: &[u8]) -> Result<Ehdr> {
    if data.get(..ELFMAG.len()) != Some(ELFMAG.as_slice()) {
        return Err(Error::with_invalid_data("file is not an ELF object"))
    }

    let class = data
        .get(EI_CLASS)
        .ok_or_invalid_data(|| "failed to read ELF identification")?;

    let mut raw = data;
    let ehdr = match *class {
        ELFCLASS32 => {
            let ehdr = raw
                .read_pod::<Elf32_Ehdr>()
                .ok_or_invalid_data(|| "failed to read Elf32_Ehdr")?;
            Ehdr {
                class: ElfClass::Bits32,
                type_: ehdr.e_type,
                shoff: ehdr.e_shoff.into(),
                shnum: ehdr.e_shnum.into(),
            }
        }
        ELFCLASS64 => {
            let ehdr = raw
                .read_pod::<Elf64_Ehdr>()
                .ok_or_invalid_data(|| "failed to read Elf64_Ehdr")?;
            Ehdr {
                class: ElfClass::Bits64,
                type_: ehdr.e_type,
                shoff: ehdr.e_shoff,
                shnum: ehdr.e_shnum.into(),
            }
        }
        class => {
            return Err(Error::with_unsupported(format!(
                "ELF class ({class}) is not supported"
            )))
        }
    };
    Ok(ehdr)
}

fn parse_shdrs(data: &[u8], ehdr: &Ehdr) -> Result<Vec<Shdr>> {
    let mut raw = data
        .get(ehdr.shoff as usize..)
        .ok_or_invalid_data(|| "ELF section header offset is invalid")?;

    let mut shdrs = Vec::with_capacity(ehdr.shnum);
    for _ in 0..ehdr.shnum {
        let shdr = match ehdr.class {
            ElfClass::Bits32 => {
                let shdr = raw
                    .read_pod::<Elf32_Shdr>()
                    .ok_or_invalid_data(|| "failed to read Elf32_Shdr")?;
                Shdr {
                    type_: shdr.sh_type,
                    offset: shdr.sh_offset.into(),
                    size: shdr.sh_size.into(),
                    link: shdr.sh_link,
                }
            }
            ElfClass::Bits64 => {
                let shdr = raw
                    .read_pod::<Elf64_Shdr>()
                    .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
                Shdr {
                    type_: shdr.sh_type,
                    offset: shdr.sh_offset,
                    size: shdr.sh_size,
                    link: shdr.sh_link,
                }
            }
        };
        let () = shdrs.push(shdr);
    }
    Ok(shdrs)
}

fn section_data<'data>(data: &'data [u8], shdr: &Shdr) -> Result<&'data [u8]> {
    let mut raw = data
        .get(shdr.offset as usize..)
        .ok_or_invalid_data(|| "failed to read section data: invalid offset")?;
    let data = raw
        .read_slice(shdr.size as usize)
        .ok_or_invalid_data(|| "failed to read section data: invalid size")?;
    Ok(data)
}

/// Read the `idx`-th entry of the symbol table section, normalized.
fn read_sym_entry(mut symtab: &[u8], class: ElfClass, idx: usize) -> Option<SymEntry> {
    match class {
        ElfClass::Bits32 => {
            let _skipped = symtab.read_slice(idx * size_of::<Elf32_Sym>())?;
            let sym = symtab.read_pod::<Elf32_Sym>()?;
            Some(SymEntry {
                name: sym.st_name,
                info: sym.st_info,
                shndx: sym.st_shndx,
                value: sym.st_value.into(),
                size: sym.st_size.into(),
            })
        }
        ElfClass::Bits64 => {
            let _skipped = symtab.read_slice(idx * size_of::<Elf64_Sym>())?;
            let sym = symtab.read_pod::<Elf64_Sym>()?;
            Some(SymEntry {
                name: sym.st_name,
                info: sym.st_info,
                shndx: sym.st_shndx,
                value: sym.st_value,
                size: sym.st_size,
            })
        }
    }
}

fn sym_entry_count(symtab: &[u8], class: ElfClass) -> usize {
    let entsize = match class {
        ElfClass::Bits32 => size_of::<Elf32_Sym>(),
        ElfClass::Bits64 => size_of::<Elf64_Sym>(),
    };
    symtab.len() / entsize
}


/// The outcome of parsing one ELF image's symbols.
struct ParsedSyms {
    syms: SymMap,
    position_independent: bool,
}

/// Parse the symbols of an ELF image.
///
/// `load_addr` is the address at which the object's first region is
/// mapped in the target process. It is only applied to position
/// independent (`ET_DYN`) objects; executables carry absolute link time
/// addresses already.
fn parse_syms(data: &[u8], load_addr: Addr) -> Result<ParsedSyms> {
    let ehdr = parse_ehdr(data)?;
    let position_independent = match ehdr.type_ {
        ET_EXEC => false,
        ET_DYN => true,
        type_ => {
            return Err(Error::with_unsupported(format!(
                "ELF object type ({type_}) is not supported"
            )))
        }
    };
    let bias = if position_independent { load_addr } else { 0 };

    let shdrs = parse_shdrs(data, &ehdr)?;
    // Prefer the full symbol table and fall back to the dynamic one. An
    // object without either is simply stripped, which is not an error.
    let symtab_shdr = shdrs
        .iter()
        .find(|shdr| shdr.type_ == SHT_SYMTAB)
        .or_else(|| shdrs.iter().find(|shdr| shdr.type_ == SHT_DYNSYM));
    let symtab_shdr = match symtab_shdr {
        Some(shdr) => shdr,
        None => {
            return Ok(ParsedSyms {
                syms: SymMap::new(),
                position_independent,
            })
        }
    };

    let strtab_shdr = shdrs
        .get(symtab_shdr.link as usize)
        .ok_or_invalid_data(|| "symbol table references an invalid string table section")?;
    let symtab = section_data(data, symtab_shdr)?;
    let strtab = section_data(data, strtab_shdr)?;

    let mut syms = SymMap::new();
    // The first entry is always the reserved null entry.
    for idx in 1..sym_entry_count(symtab, ehdr.class) {
        let entry = read_sym_entry(symtab, ehdr.class, idx)
            .ok_or_invalid_data(|| "failed to read symbol table entry")?;
        // Undefined and absolute entries do not denote a resident
        // address; unnamed ones are linker artifacts.
        if entry.name == 0 || entry.shndx == SHN_UNDEF || entry.shndx == SHN_ABS {
            continue
        }
        let name = match strtab
            .get(entry.name as usize..)
            .and_then(|mut data| data.read_cstr())
            .and_then(|name| name.to_str().ok())
        {
            Some("") | None => {
                // A corrupt entry must not abort the whole load.
                trace!("skipping symbol table entry with unresolvable name");
                continue
            }
            Some(name) => name,
        };

        let addr = entry.value.wrapping_add(bias);
        // Later entries for the same address simply win.
        let _prev = syms.insert(
            addr,
            Sym {
                addr,
                size: entry.size,
                name: Box::from(name),
                code: entry.info & 0xf == STT_FUNC,
            },
        );
    }

    Ok(ParsedSyms {
        syms,
        position_independent,
    })
}


/// The symbol table of one on-disk ELF module, with all addresses
/// relocated into the target process' address space.
///
/// Built once from the file; immutable thereafter.
#[derive(Debug)]
pub(crate) struct ModuleSymbols {
    /// The path to the file the table was loaded from.
    path: PathBuf,
    /// All symbols, keyed by their relocated start address.
    syms: SymMap,
    /// Whether the object's symbol addresses were relative to a runtime
    /// chosen load base.
    position_independent: bool,
}

impl ModuleSymbols {
    /// Load the symbol table of the ELF object at `path`, mapped at
    /// `load_addr` in the target process.
    pub(crate) fn load(path: &Path, load_addr: Addr) -> Result<Self> {
        let mmap = Mmap::open(path)
            .with_context(|| format!("failed to open module `{}`", path.display()))?;
        let parsed = parse_syms(&mmap, load_addr)
            .with_context(|| format!("failed to parse module `{}`", path.display()))?;
        let slf = Self {
            path: path.to_path_buf(),
            syms: parsed.syms,
            position_independent: parsed.position_independent,
        };
        Ok(slf)
    }

    #[cfg(test)]
    fn from_bytes(data: &[u8], load_addr: Addr) -> Result<Self> {
        let parsed = parse_syms(data, load_addr)?;
        Ok(Self {
            path: PathBuf::new(),
            syms: parsed.syms,
            position_independent: parsed.position_independent,
        })
    }

    /// Find the symbol covering `addr`, if any.
    ///
    /// A symbol covers the half-open range starting at its address and
    /// extending for its size; a zero size symbol names only its own
    /// address.
    pub(crate) fn find_sym(&self, addr: Addr) -> Option<&Sym> {
        let (_addr, sym) = self.syms.range(..=addr).next_back()?;
        let covered = if sym.size == 0 {
            sym.addr == addr
        } else {
            addr - sym.addr < sym.size
        };
        covered.then_some(sym)
    }

    /// The path to the file this table was loaded from.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the object's symbol addresses were relative to a runtime
    /// chosen load base.
    pub(crate) fn is_position_independent(&self) -> bool {
        self.position_independent
    }

    /// The number of symbols loaded.
    pub(crate) fn len(&self) -> usize {
        self.syms.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::mem::size_of;
    use std::slice;

    use test_log::test;

    use crate::util::Pod;
    use crate::ErrorKind;

    use super::super::types::SHT_STRTAB;


    /// A symbol description for synthesized test images.
    struct TestSym {
        name: &'static str,
        value: u64,
        size: u64,
        info: u8,
        shndx: u16,
    }

    impl TestSym {
        fn func(name: &'static str, value: u64, size: u64) -> Self {
            Self {
                name,
                value,
                size,
                info: STT_FUNC,
                shndx: 1,
            }
        }
    }

    fn push_pod<T>(buf: &mut Vec<u8>, value: &T)
    where
        T: Pod,
    {
        // SAFETY: `T` is `Pod`, so its bytes are all initialized and
        //         can be copied freely.
        let bytes =
            unsafe { slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) };
        buf.extend_from_slice(bytes);
    }

    fn build_strtab(syms: &[TestSym]) -> (Vec<u8>, Vec<u32>) {
        let mut strtab = vec![0u8];
        let mut offsets = Vec::new();
        for sym in syms {
            if sym.name.is_empty() {
                offsets.push(0);
            } else {
                offsets.push(strtab.len() as u32);
                strtab.extend_from_slice(sym.name.as_bytes());
                strtab.push(0);
            }
        }
        (strtab, offsets)
    }

    /// Synthesize a minimal 64 bit ELF image containing a symbol table.
    fn build_elf64(e_type: u16, symtab_type: u32, syms: &[TestSym]) -> Vec<u8> {
        let (strtab, offsets) = build_strtab(syms);

        let mut symtab = Vec::new();
        push_pod(&mut symtab, &Elf64_Sym::default());
        for (sym, name) in syms.iter().zip(offsets) {
            push_pod(
                &mut symtab,
                &Elf64_Sym {
                    st_name: name,
                    st_info: sym.info,
                    st_other: 0,
                    st_shndx: sym.shndx,
                    st_value: sym.value,
                    st_size: sym.size,
                },
            );
        }

        let shoff = size_of::<Elf64_Ehdr>();
        let symtab_off = shoff + 3 * size_of::<Elf64_Shdr>();
        let strtab_off = symtab_off + symtab.len();

        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&ELFMAG);
        ident[EI_CLASS] = ELFCLASS64;

        let mut data = Vec::new();
        push_pod(
            &mut data,
            &Elf64_Ehdr {
                e_ident: ident,
                e_type,
                e_machine: 0x3e,
                e_version: 1,
                e_entry: 0,
                e_phoff: 0,
                e_shoff: shoff as u64,
                e_flags: 0,
                e_ehsize: size_of::<Elf64_Ehdr>() as u16,
                e_phentsize: 0,
                e_phnum: 0,
                e_shentsize: size_of::<Elf64_Shdr>() as u16,
                e_shnum: 3,
                e_shstrndx: 0,
            },
        );
        push_pod(&mut data, &Elf64_Shdr::default());
        push_pod(
            &mut data,
            &Elf64_Shdr {
                sh_type: symtab_type,
                sh_offset: symtab_off as u64,
                sh_size: symtab.len() as u64,
                sh_link: 2,
                sh_entsize: size_of::<Elf64_Sym>() as u64,
                ..Elf64_Shdr::default()
            },
        );
        push_pod(
            &mut data,
            &Elf64_Shdr {
                sh_type: SHT_STRTAB,
                sh_offset: strtab_off as u64,
                sh_size: strtab.len() as u64,
                ..Elf64_Shdr::default()
            },
        );
        data.extend_from_slice(&symtab);
        data.extend_from_slice(&strtab);
        data
    }

    /// Synthesize a minimal 32 bit ELF image containing a symbol table.
    fn build_elf32(e_type: u16, syms: &[TestSym]) -> Vec<u8> {
        let (strtab, offsets) = build_strtab(syms);

        let mut symtab = Vec::new();
        push_pod(&mut symtab, &Elf32_Sym::default());
        for (sym, name) in syms.iter().zip(offsets) {
            push_pod(
                &mut symtab,
                &Elf32_Sym {
                    st_name: name,
                    st_value: sym.value as u32,
                    st_size: sym.size as u32,
                    st_info: sym.info,
                    st_other: 0,
                    st_shndx: sym.shndx,
                },
            );
        }

        let shoff = size_of::<Elf32_Ehdr>();
        let symtab_off = shoff + 3 * size_of::<Elf32_Shdr>();
        let strtab_off = symtab_off + symtab.len();

        let mut ident = [0u8; 16];
        ident[..4].copy_from_slice(&ELFMAG);
        ident[EI_CLASS] = ELFCLASS32;

        let mut data = Vec::new();
        push_pod(
            &mut data,
            &Elf32_Ehdr {
                e_ident: ident,
                e_type,
                e_machine: 0x03,
                e_version: 1,
                e_entry: 0,
                e_phoff: 0,
                e_shoff: shoff as u32,
                e_flags: 0,
                e_ehsize: size_of::<Elf32_Ehdr>() as u16,
                e_phentsize: 0,
                e_phnum: 0,
                e_shentsize: size_of::<Elf32_Shdr>() as u16,
                e_shnum: 3,
                e_shstrndx: 0,
            },
        );
        push_pod(&mut data, &Elf32_Shdr::default());
        push_pod(
            &mut data,
            &Elf32_Shdr {
                sh_type: SHT_SYMTAB,
                sh_offset: symtab_off as u32,
                sh_size: symtab.len() as u32,
                sh_link: 2,
                sh_entsize: size_of::<Elf32_Sym>() as u32,
                ..Elf32_Shdr::default()
            },
        );
        push_pod(
            &mut data,
            &Elf32_Shdr {
                sh_type: SHT_STRTAB,
                sh_offset: strtab_off as u32,
                sh_size: strtab.len() as u32,
                ..Elf32_Shdr::default()
            },
        );
        data.extend_from_slice(&symtab);
        data.extend_from_slice(&strtab);
        data
    }

    fn sample_syms() -> Vec<TestSym> {
        vec![
            TestSym::func("alpha", 0x1000, 0x10),
            TestSym::func("beta", 0x1010, 0x20),
        ]
    }


    /// Check that executables keep their absolute link time addresses
    /// while position independent objects are relocated by the load
    /// address, for both word sizes.
    #[test]
    fn relocation_by_object_type() {
        let bias = 0x7f0000000000u64;

        for dyn_data in [
            build_elf64(ET_DYN, SHT_SYMTAB, &sample_syms()),
            build_elf32(ET_DYN, &sample_syms()),
        ] {
            let module = ModuleSymbols::from_bytes(&dyn_data, bias).unwrap();
            assert!(module.position_independent);
            let sym = module.find_sym(bias + 0x1000).unwrap();
            assert_eq!(&*sym.name, "alpha");
            assert_eq!(sym.addr, bias + 0x1000);
            assert_eq!(module.find_sym(0x1000), None);
        }

        for exec_data in [
            build_elf64(ET_EXEC, SHT_SYMTAB, &sample_syms()),
            build_elf32(ET_EXEC, &sample_syms()),
        ] {
            // The load address must be ignored for executables.
            let module = ModuleSymbols::from_bytes(&exec_data, bias).unwrap();
            assert!(!module.position_independent);
            let sym = module.find_sym(0x1000).unwrap();
            assert_eq!(&*sym.name, "alpha");
            assert!(sym.code);
        }
    }

    /// Check that both word sizes produce the same logical symbol set.
    #[test]
    fn class_equivalence() {
        let module64 =
            ModuleSymbols::from_bytes(&build_elf64(ET_EXEC, SHT_SYMTAB, &sample_syms()), 0)
                .unwrap();
        let module32 =
            ModuleSymbols::from_bytes(&build_elf32(ET_EXEC, &sample_syms()), 0).unwrap();
        assert_eq!(module64.syms, module32.syms);
    }

    /// Symbols with `SHN_UNDEF`/`SHN_ABS` section indices and empty
    /// names must never appear in the loaded table.
    #[test]
    fn linker_artifact_exclusion() {
        let syms = vec![
            TestSym::func("real", 0x1000, 0x10),
            TestSym {
                name: "undefined",
                value: 0x2000,
                size: 0x10,
                info: STT_FUNC,
                shndx: SHN_UNDEF,
            },
            TestSym {
                name: "absolute",
                value: 0x3000,
                size: 0x10,
                info: STT_FUNC,
                shndx: SHN_ABS,
            },
            TestSym {
                name: "",
                value: 0x4000,
                size: 0x10,
                info: STT_FUNC,
                shndx: 1,
            },
        ];
        let module =
            ModuleSymbols::from_bytes(&build_elf64(ET_EXEC, SHT_SYMTAB, &syms), 0).unwrap();
        assert_eq!(module.len(), 1);
        assert_eq!(&*module.find_sym(0x1000).unwrap().name, "real");
        assert_eq!(module.find_sym(0x2000), None);
        assert_eq!(module.find_sym(0x3000), None);
        assert_eq!(module.find_sym(0x4000), None);
    }

    /// When two entries resolve to the same address, the later one in
    /// table order wins.
    #[test]
    fn last_entry_wins() {
        let syms = vec![
            TestSym::func("first", 0x1000, 0x10),
            TestSym::func("second", 0x1000, 0x10),
        ];
        let module =
            ModuleSymbols::from_bytes(&build_elf64(ET_EXEC, SHT_SYMTAB, &syms), 0).unwrap();
        assert_eq!(module.len(), 1);
        assert_eq!(&*module.find_sym(0x1000).unwrap().name, "second");
    }

    /// The dynamic symbol table is used when no full one exists.
    #[test]
    fn dynsym_fallback() {
        let module =
            ModuleSymbols::from_bytes(&build_elf64(ET_DYN, SHT_DYNSYM, &sample_syms()), 0)
                .unwrap();
        assert_eq!(module.len(), 2);
    }

    /// An object without any symbol table section yields an empty, but
    /// valid, module.
    #[test]
    fn stripped_object() {
        // Use a section type that is neither SHT_SYMTAB nor SHT_DYNSYM.
        let module =
            ModuleSymbols::from_bytes(&build_elf64(ET_EXEC, SHT_STRTAB, &sample_syms()), 0)
                .unwrap();
        assert_eq!(module.len(), 0);
        assert_eq!(module.find_sym(0x1000), None);
    }

    /// Non-ELF input and unsupported object types are rejected with
    /// distinguishable kinds.
    #[test]
    fn load_failure_kinds() {
        let err = ModuleSymbols::from_bytes(b"#!/bin/sh\n", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        // ET_REL (1) is a relocatable object, which we do not handle.
        let err =
            ModuleSymbols::from_bytes(&build_elf64(1, SHT_SYMTAB, &sample_syms()), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    /// A single entry with an unresolvable name is skipped without
    /// aborting the load.
    #[test]
    fn corrupt_name_skipped() {
        let mut data = build_elf64(
            ET_EXEC,
            SHT_SYMTAB,
            &[
                TestSym::func("good", 0x1000, 0x10),
                TestSym::func("bad", 0x2000, 0x10),
            ],
        );
        // Point the second symbol's name way past the string table.
        let symtab_off = size_of::<Elf64_Ehdr>() + 3 * size_of::<Elf64_Shdr>();
        let bad_name_off = symtab_off + 2 * size_of::<Elf64_Sym>();
        data[bad_name_off..bad_name_off + 4].copy_from_slice(&u32::MAX.to_ne_bytes());

        let module = ModuleSymbols::from_bytes(&data, 0).unwrap();
        assert_eq!(module.len(), 1);
        assert_eq!(&*module.find_sym(0x1000).unwrap().name, "good");
    }

    /// Exercise the half-open range and zero size matching rules.
    #[test]
    fn symbol_range_matching() {
        let syms = vec![
            TestSym::func("foo", 0x1000, 0x10),
            TestSym {
                name: "bar",
                value: 0x2000,
                size: 0,
                info: STT_FUNC,
                shndx: 1,
            },
        ];
        let module =
            ModuleSymbols::from_bytes(&build_elf64(ET_EXEC, SHT_SYMTAB, &syms), 0).unwrap();

        assert_eq!(&*module.find_sym(0x1008).unwrap().name, "foo");
        assert_eq!(&*module.find_sym(0x100f).unwrap().name, "foo");
        // The end of the range is exclusive.
        assert_eq!(module.find_sym(0x1010), None);
        // A zero size symbol names only its own address.
        assert_eq!(&*module.find_sym(0x2000).unwrap().name, "bar");
        assert_eq!(module.find_sym(0x2001), None);
        assert_eq!(module.find_sym(0xfff), None);
    }
}
