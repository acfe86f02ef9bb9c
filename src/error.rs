use std::io;

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// BSD sysexits codes used by the binary.
pub const EX_OK: u8 = 0;
pub const EX_USAGE: u8 = 64;
pub const EX_DATAERR: u8 = 65;
pub const EX_SOFTWARE: u8 = 70;
pub const EX_OSERR: u8 = 71;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} is not a valid value for '--alignment' (expected 1, 2, 4 or 8)")]
    InvalidWidth(u64),

    #[error("'{0}' is not a valid value for '--mask'")]
    InvalidMask(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("failed to open shared memory '{name}': {source}")]
    SharedMemory { name: String, source: Errno },

    #[error("shared memory '{0}' has a size of zero")]
    EmptySegment(String),

    #[error("failed to open semaphore '{name}': {source}")]
    Semaphore { name: String, source: Errno },

    #[error("semaphore '{name}' operation failed: {source}")]
    SemaphoreOp { name: String, source: Errno },

    #[error("nothing to fill: size {size}, offset {offset}, alignment {width}")]
    NoElements {
        size: usize,
        offset: usize,
        width: usize,
    },

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("interval timer error: {0}")]
    Timer(Errno),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::InvalidWidth(_) | Error::InvalidMask(_) | Error::InvalidOptions(_) => EX_USAGE,
            Error::EmptySegment(_) | Error::NoElements { .. } => EX_DATAERR,
            Error::Semaphore { .. } | Error::SemaphoreOp { .. } => EX_SOFTWARE,
            Error::SharedMemory { .. } | Error::Signal(_) | Error::Timer(_) | Error::Io(_) => {
                EX_OSERR
            }
        }
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        Error::Io(value.into())
    }
}
