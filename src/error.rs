//! Unified error kinds for the VFS, the FAT16 engine, and the process
//! engine. `Corrupt` is fatal: callers cannot recover from it, so it is kept
//! as a dedicated variant the top level matches on and aborts.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no such file or directory: {0}")]
    NoEnt(String),

    #[error("not a directory: {0}")]
    NotDir(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("no space left on built-in filesystem")]
    NoSpace,

    #[error("bad file descriptor: {0}")]
    BadFd(i32),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("operation not supported by the active driver: {0}")]
    NotSup(&'static str),

    #[error("built-in filesystem is corrupt: {0}")]
    Corrupt(String),

    #[error("host I/O error: {0}")]
    HostIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the one error kind that the top level must treat as fatal.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt(_))
    }
}
