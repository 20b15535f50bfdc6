use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::elf::ModuleSymbols;
use crate::maps;
use crate::maps::Region;
use crate::perf_map::PerfMap;
use crate::util::find_match_or_lower_bound_by_key;
use crate::Addr;
use crate::Pid;
use crate::Result;
use crate::Sym;


/// A symbol index for one process, combining the symbol tables of all
/// file backed modules in its address space with a runtime symbol
/// overlay.
///
/// The index is a point-in-time snapshot of the process' memory map.
#[derive(Debug)]
pub struct ProcessIndex {
    /// The process this index describes.
    pid: Pid,
    /// All memory regions, ascending by start address.
    regions: Vec<Region>,
    /// Per-module symbol tables, in no particular order.
    modules: Vec<ModuleSymbols>,
    /// Runtime generated symbols; consulted before module tables.
    overlay: PerfMap,
}

impl ProcessIndex {
    /// Build the index for the process identified by `pid`, using
    /// `overlay` for runtime generated symbols.
    ///
    /// Modules that fail to load, e.g., because they were deleted after
    /// being mapped or are not ELF objects, are reported and skipped;
    /// only failure to read the memory map itself is an error.
    pub fn load(pid: Pid, overlay: PerfMap) -> Result<Self> {
        let regions = maps::parse(pid)?.collect::<Result<Vec<_>>>()?;
        let modules = load_modules(&regions);
        debug!(
            "indexed process {pid}: {} regions, {} modules, {} runtime symbols",
            regions.len(),
            modules.len(),
            overlay.len()
        );
        let slf = Self {
            pid,
            regions,
            modules,
            overlay,
        };
        Ok(slf)
    }

    /// The process this index describes.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Find the memory region containing `addr`, if any.
    pub fn find_region(&self, addr: Addr) -> Option<&Region> {
        let idx = find_match_or_lower_bound_by_key(&self.regions, addr, |region| {
            region.range.start
        })?;
        self.regions[idx..]
            .iter()
            .take_while(|region| region.range.start <= addr)
            .find(|region| region.range.contains(&addr))
    }

    /// Find the symbol covering `addr`.
    ///
    /// The runtime overlay takes precedence: if it contains a symbol
    /// starting at exactly `addr`, that symbol is returned even when a
    /// module symbol also covers the address. Otherwise the module
    /// backing the containing region is consulted.
    pub fn find_sym(&self, addr: Addr) -> Option<&Sym> {
        if let Some(sym) = self.overlay.find_sym(addr) {
            return Some(sym)
        }
        let region = self.find_region(addr)?;
        if !region.has_backing_file() {
            return None
        }
        self.modules
            .iter()
            .find(|module| module.path() == region.path)?
            .find_sym(addr)
    }

    /// Iterate over all runtime generated symbols, ascending by
    /// address.
    pub fn runtime_syms(&self) -> impl Iterator<Item = &Sym> {
        self.overlay.iter()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(pid: Pid, regions: Vec<Region>, overlay: PerfMap) -> Self {
        Self {
            pid,
            regions,
            modules: Vec::new(),
            overlay,
        }
    }
}


/// Load the symbol tables of all file backed modules appearing in
/// `regions`.
///
/// Each distinct backing file is loaded once; its load address is the
/// start of the lowest region mapping it, which for the common case of
/// a file mapped at offset zero first is the object's load bias.
fn load_modules(regions: &[Region]) -> Vec<ModuleSymbols> {
    let mut load_addrs = HashMap::<&PathBuf, Addr>::new();
    for region in regions {
        if region.has_backing_file() {
            let _addr = load_addrs.entry(&region.path).or_insert(region.range.start);
        }
    }

    let mut paths = load_addrs.into_iter().collect::<Vec<_>>();
    // Deterministic load order for reproducible diagnostics.
    let () = paths.sort_by_key(|&(_path, addr)| addr);

    let mut modules = Vec::new();
    for (path, load_addr) in paths {
        // Regions can reference files that no longer exist or special
        // files we cannot mmap; both are expected and non-fatal.
        match path.metadata() {
            Ok(metadata) if metadata.is_file() => (),
            _ => continue,
        }
        match ModuleSymbols::load(path, load_addr) {
            Ok(module) => {
                if module.len() > 0 {
                    debug!(
                        "loaded {} symbols from `{}` at {load_addr:#x}{}",
                        module.len(),
                        path.display(),
                        if module.is_position_independent() {
                            " (position independent)"
                        } else {
                            ""
                        },
                    );
                    let () = modules.push(module);
                }
            }
            Err(err) => {
                warn!("failed to load symbols of `{}`: {err}", path.display());
            }
        }
    }
    modules
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    fn index_with_overlay(content: &str) -> ProcessIndex {
        let mut overlay = PerfMap::new();
        let () = overlay.extend_from_reader(content.as_bytes()).unwrap();
        ProcessIndex::from_parts(Pid::Slf, Vec::new(), overlay)
    }

    /// Check that the index of the current process can be built and
    /// resolves a symbol of our own executable's address space.
    #[test]
    fn self_indexing() {
        let index = ProcessIndex::load(Pid::Slf, PerfMap::new()).unwrap();
        assert_eq!(index.pid(), Pid::Slf);
        assert!(!index.regions.is_empty());

        // The region lookup must agree with the raw map.
        let region = index.regions[0].clone();
        let found = index.find_region(region.range.start).unwrap();
        assert_eq!(found.range, region.range);
        let found = index.find_region(region.range.end - 1).unwrap();
        assert_eq!(found.range, region.range);
    }

    /// Resolve a function of our own test binary, exercising the full
    /// region and module table path.
    #[test]
    fn self_symbol_resolution() {
        #[inline(never)]
        fn known_function() -> u64 {
            42
        }

        let index = ProcessIndex::load(Pid::Slf, PerfMap::new()).unwrap();
        let addr = known_function as usize as Addr;
        assert_eq!(known_function(), 42);

        let sym = index.find_sym(addr).unwrap();
        assert!(sym.name.contains("known_function"), "{}", sym.name);
        assert!(sym.code);
    }

    /// Addresses outside of every region yield no match.
    #[test]
    fn region_lookup_misses() {
        let regions = vec![
            Region::for_range(0x1000..0x2000),
            Region::for_range(0x4000..0x5000),
        ];
        let index = ProcessIndex::from_parts(Pid::Slf, regions, PerfMap::new());

        assert_eq!(index.find_region(0xfff), None);
        assert!(index.find_region(0x1000).is_some());
        assert!(index.find_region(0x1fff).is_some());
        // Half-open upper bound and the gap between the regions.
        assert_eq!(index.find_region(0x2000), None);
        assert_eq!(index.find_region(0x3000), None);
        assert!(index.find_region(0x4000).is_some());
        assert_eq!(index.find_region(0x5000), None);
    }

    /// Runtime symbols take precedence over module symbols and match
    /// only at their exact start address.
    #[test]
    fn overlay_precedence() {
        let index = index_with_overlay("1000 10 jit_fn\n2000 0 jit_marker\n");

        let sym = index.find_sym(0x1000).unwrap();
        assert_eq!(&*sym.name, "jit_fn");
        // Overlay entries do not cover a range during index lookup;
        // interior addresses fall through to module tables.
        assert_eq!(index.find_sym(0x1001), None);

        let sym = index.find_sym(0x2000).unwrap();
        assert_eq!(&*sym.name, "jit_marker");
        assert_eq!(index.find_sym(0x2001), None);

        let names = index.runtime_syms().map(|sym| &*sym.name).collect::<Vec<_>>();
        assert_eq!(names, ["jit_fn", "jit_marker"]);
    }
}
