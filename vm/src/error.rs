use std::{fmt, io};

use thiserror::Error;

use crate::page_table::Vp;

pub type Result<T> = std::result::Result<T, VmError>;

/// Why a process stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The process called exit with this status.
    Exit(i32),
    /// Touched a virtual page it never mapped.
    BusError,
    /// Wrote to a read-only page.
    ReadOnly,
    /// Swap or image I/O failed while servicing one of its faults.
    IoFailure,
    /// No frame could be found for one of its pages.
    OutOfMemory,
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Exit(status) => write!(f, "exit({})", status),
            ExitCause::BusError => write!(f, "bus error"),
            ExitCause::ReadOnly => write!(f, "read-only violation"),
            ExitCause::IoFailure => write!(f, "i/o failure"),
            ExitCause::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("virtual page {vpn:#x} is not mapped")]
    Unmapped { vpn: usize },

    #[error("virtual page {vpn:#x} is read-only")]
    ReadOnly { vpn: usize },

    #[error("{0} has no swap entry")]
    NotInSwap(Vp),

    #[error("swap i/o: {0}")]
    Io(#[from] io::Error),

    #[error("no physical frame available")]
    OutOfMemory,

    #[error("invalid executable: {0}")]
    BadExecutable(String),

    #[error("section `{section}` failed to load page {page}: {reason}")]
    SectionLoad {
        section: String,
        page: usize,
        reason: String,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("process {pid} terminated: {cause}")]
    Terminated { pid: u32, cause: ExitCause },
}

impl VmError {
    /// How a process dies when this error escapes one of its memory operations.
    pub fn exit_cause(&self) -> ExitCause {
        match self {
            VmError::Unmapped { .. } | VmError::NotInSwap(_) => ExitCause::BusError,
            VmError::ReadOnly { .. } => ExitCause::ReadOnly,
            VmError::OutOfMemory => ExitCause::OutOfMemory,
            VmError::Terminated { cause, .. } => *cause,
            VmError::Io(_)
            | VmError::SectionLoad { .. }
            | VmError::BadExecutable(_)
            | VmError::Config(_) => ExitCause::IoFailure,
        }
    }
}

impl From<toml::de::Error> for VmError {
    fn from(err: toml::de::Error) -> Self {
        VmError::Config(err.to_string())
    }
}
