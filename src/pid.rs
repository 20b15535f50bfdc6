use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::num::NonZeroU32;
use std::process;


/// An enumeration identifying a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pid {
    /// The current process.
    Slf,
    /// The process identified by the provided ID.
    Pid(NonZeroU32),
}

impl Pid {
    /// Resolve this [`Pid`] into an actual number, substituting the ID of
    /// the running process for the symbolic [`Pid::Slf`] variant.
    pub(crate) fn resolve(&self) -> u32 {
        match self {
            Self::Slf => process::id(),
            Self::Pid(pid) => pid.get(),
        }
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Slf => write!(f, "self"),
            Self::Pid(pid) => write!(f, "{pid}"),
        }
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        NonZeroU32::new(pid).map(Pid::Pid).unwrap_or(Pid::Slf)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::read_link;


    /// Check that [`Pid::Slf`] resolves to the ID of the test process.
    #[test]
    fn self_resolution() {
        let pid = read_link("/proc/self")
            .unwrap()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .parse::<u32>()
            .unwrap();

        assert_eq!(Pid::Slf.resolve(), pid);
        assert_eq!(Pid::from(pid).to_string(), format!("{pid}"));
        assert_eq!(Pid::from(0), Pid::Slf);
    }
}
