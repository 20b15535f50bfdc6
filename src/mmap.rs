use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A read-only memory mapping of a file.
#[derive(Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping. `None` for empty files, which the
    /// kernel refuses to map.
    mapping: Option<Mapping>,
}

impl Mmap {
    /// Memory map the file at the provided `path`, in its entirety.
    pub(crate) fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path)?;
        Self::map(&file)
    }

    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = libc::size_t::try_from(file.metadata()?.len())
            .map_err(|_err| Error::with_invalid_data("file is too large to mmap"))?;

        let mapping = if len == 0 {
            None
        } else {
            // SAFETY: The file is mapped read-only; mutation through
            //         other mappings would be visible but we only ever
            //         treat the data as an untrusted byte buffer.
            let mapping = unsafe { MmapOptions::new().map(file) }
                .map_err(Error::from)
                .context("failed to mmap file")?;
            Some(mapping)
        };
        Ok(Self { mapping })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.mapping {
            Some(mapping) => mapping.deref(),
            None => &[],
        }
    }
}
