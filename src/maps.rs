use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::ops::Range;
use std::path::Component;
use std::path::PathBuf;

use tracing::trace;

use crate::Addr;
use crate::Pid;
use crate::Result;

const MODE_READ: u8 = 0b1000;
const MODE_WRITE: u8 = 0b0100;
const MODE_EXEC: u8 = 0b0010;
const MODE_PRIVATE: u8 = 0b0001;


/// One virtual memory area of a process, as reported by the kernel's
/// memory map.
///
/// A region is a point-in-time view: the target process can map and
/// unmap memory at any moment, so a snapshot has to be re-taken to stay
/// truthful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// The virtual address range covered by this region.
    pub range: Range<Addr>,
    /// The `rwxp` protection and sharing bits.
    mode: u8,
    /// The offset into the backing file at which the mapping starts.
    pub offset: u64,
    /// The path to the backing file, if any. Empty for anonymous
    /// mappings; pseudo paths such as `[heap]` are preserved verbatim.
    pub path: PathBuf,
}

impl Region {
    /// Whether the region is mapped readable.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.mode & MODE_READ != 0
    }

    /// Whether the region is mapped writable.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.mode & MODE_WRITE != 0
    }

    /// Whether the region is mapped executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.mode & MODE_EXEC != 0
    }

    /// Whether the region is a shared (as opposed to private,
    /// copy-on-write) mapping.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.mode & MODE_PRIVATE == 0
    }

    /// Whether the region is backed by an actual file system path, as
    /// opposed to being anonymous or backed by a pseudo entry such as
    /// `[vdso]`.
    #[inline]
    pub fn has_backing_file(&self) -> bool {
        self.path.components().next() == Some(Component::RootDir)
    }
}


#[cfg(test)]
impl Region {
    /// Create an anonymous region covering `range`, for tests.
    pub(crate) fn for_range(range: Range<Addr>) -> Self {
        Self {
            range,
            mode: 0,
            offset: 0,
            path: PathBuf::new(),
        }
    }
}


/// Parse a line of a proc maps file.
///
/// Lines have the following format:
/// ```text
/// address           perms offset  dev   inode      pathname
/// 08048000-08049000 r-xp 00000000 03:00 8312       /opt/test
/// 0804a000-0806b000 rw-p 00000000 00:00 0          [heap]
/// a7cb1000-a7cb2000 ---p 00000000 00:00 0
/// ```
/// Lines not matching this shape yield `None`; only `dev` and `inode`
/// are ignored by design.
fn parse_maps_line(line: &str) -> Option<Region> {
    let mut fields = line.split_ascii_whitespace();

    let (start, end) = fields.next()?.split_once('-')?;
    let start = Addr::from_str_radix(start, 16).ok()?;
    let end = Addr::from_str_radix(end, 16).ok()?;
    if start >= end {
        return None
    }

    let perms = fields.next()?;
    let mut chars = perms.chars();
    let mut mode = 0;
    for bit in [MODE_READ, MODE_WRITE, MODE_EXEC, MODE_PRIVATE] {
        match (chars.next()?, bit) {
            ('r', MODE_READ) | ('w', MODE_WRITE) | ('x', MODE_EXEC) | ('p', MODE_PRIVATE) => {
                mode |= bit
            }
            ('-', _) | ('s', MODE_PRIVATE) => (),
            _ => return None,
        }
    }

    let offset = u64::from_str_radix(fields.next()?, 16).ok()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;

    // The path is the remainder of the line, which may contain spaces
    // itself, so we cannot take it from the whitespace split.
    let path = match fields.next() {
        Some(first) => {
            let idx = first.as_ptr() as usize - line.as_ptr() as usize;
            PathBuf::from(line[idx..].trim_end())
        }
        None => PathBuf::new(),
    };

    let region = Region {
        range: start..end,
        mode,
        offset,
        path,
    };
    Some(region)
}


#[derive(Debug)]
struct RegionIter<R> {
    reader: R,
    line: String,
}

impl<R> Iterator for RegionIter<R>
where
    R: BufRead,
{
    type Item = Result<Region>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let () = self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Err(err) => return Some(Err(err.into())),
                Ok(0) => break None,
                Ok(_) => {
                    let line = self.line.trim();
                    if line.is_empty() {
                        continue
                    }
                    match parse_maps_line(line) {
                        Some(region) => break Some(Ok(region)),
                        None => {
                            // Unrecognized lines are skipped, not
                            // treated as errors.
                            trace!("ignoring unrecognized maps line: {line}");
                        }
                    }
                }
            }
        }
    }
}


/// Parse a proc maps file from the provided reader.
fn parse_file<R>(reader: R) -> impl Iterator<Item = Result<Region>>
where
    R: Read,
{
    RegionIter {
        reader: BufReader::new(reader),
        line: String::new(),
    }
}

/// Parse the memory map of the process with the given PID.
///
/// Regions are yielded in the kernel's reporting order, which is
/// ascending by start address.
pub(crate) fn parse(pid: Pid) -> Result<impl Iterator<Item = Result<Region>>> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(path)?;
    Ok(parse_file(file))
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use test_log::test;


    const MAPS: &str = r#"
55f4a95c9000-55f4a95cb000 r--p 00000000 00:20 41445                      /usr/bin/cat
55f4a95cb000-55f4a95cf000 r-xp 00002000 00:20 41445                      /usr/bin/cat
55f4aa379000-55f4aa39a000 rw-p 00000000 00:00 0                          [heap]
7f1273b05000-7f1273b06000 r--s 00000000 00:13 19                         /sys/fs/selinux/status
7fa7bb5fa000-7fa7bb602000 rw-p 00000000 00:00 0
7ffd033ab000-7ffd033ad000 r-xp 00000000 00:00 0                          [vdso]
this line is garbage
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0                  [vsyscall]
"#;

    /// Check that we can parse the process' own maps file.
    #[test]
    fn self_map_parsing() {
        let count = parse(Pid::Slf)
            .unwrap()
            .map(|region| region.unwrap())
            .count();
        assert_ne!(count, 0);
    }

    /// Check proc maps line parsing, including the skipping of
    /// unrecognized lines.
    #[test]
    fn map_line_parsing() {
        let regions = parse_file(MAPS.as_bytes())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // The garbage line is dropped silently.
        assert_eq!(regions.len(), 7);

        let region = &regions[0];
        assert_eq!(region.range, 0x55f4a95c9000..0x55f4a95cb000);
        assert_eq!(region.offset, 0);
        assert_eq!(region.path, Path::new("/usr/bin/cat"));
        assert!(region.is_readable());
        assert!(!region.is_writable());
        assert!(!region.is_executable());
        assert!(!region.is_shared());
        assert!(region.has_backing_file());

        let region = &regions[1];
        assert_eq!(region.offset, 0x2000);
        assert!(region.is_executable());

        let heap = &regions[2];
        assert_eq!(heap.path, Path::new("[heap]"));
        assert!(!heap.has_backing_file());

        let shared = &regions[3];
        assert!(shared.is_shared());
        assert!(shared.has_backing_file());

        let anon = &regions[4];
        assert_eq!(anon.path, Path::new(""));
        assert!(!anon.has_backing_file());
    }

    /// Make sure that degenerate address ranges are rejected.
    #[test]
    fn degenerate_range_rejection() {
        assert_eq!(
            parse_maps_line("55f4a95c9000-55f4a95c9000 r--p 00000000 00:20 41445 /usr/bin/cat"),
            None
        );
        assert_eq!(parse_maps_line("55f4a95c9000 r--p 00000000 00:20 41445"), None);
    }
}
