//! Kernel version parsing
//!
//! Nodes report free-form kernel strings such as `5.4.0-66-generic` or
//! `4.18.0-305.el8.x86_64`. Only the leading `major.minor` pair matters for
//! platform selection.

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MAJOR_MINOR: Regex =
        Regex::new(r"^(\d+)\.(\d+)").expect("Expected kernel version pattern to compile.");
}

/// `major.minor` of a kernel release, ordered numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u64,
    pub minor: u64,
}

impl KernelVersion {
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Parse the leading `<digits>.<digits>` of a raw kernel string
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::KernelVersionParse("kernel version is empty".into()));
        }
        let captures = MAJOR_MINOR.captures(raw).ok_or_else(|| {
            Error::KernelVersionParse(format!("no major.minor prefix in {:?}", raw))
        })?;
        let component = |idx: usize| -> Result<u64> {
            captures[idx]
                .parse()
                .map_err(|e| Error::KernelVersionParse(format!("{:?}: {}", raw, e)))
        };
        Ok(Self {
            major: component(1)?,
            minor: component(2)?,
        })
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for KernelVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
