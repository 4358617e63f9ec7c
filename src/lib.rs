//! Core of a unified-namespace shell: a VFS dispatch layer routing I/O
//! between the host filesystem and a self-contained FAT16-style image, plus
//! a job-control process engine on top.
//!
//! The lexer/parser/symbol-table/line-editor/prompt/builtins modules also
//! live here (spec.md treats them as external collaborators) so the crate
//! is a runnable shell, but the three hard subsystems are the FAT16 engine
//! ([`image`], [`fat`], [`dirent`], [`fatfs`]), the VFS dispatch ([`vfs`]),
//! and the job-control process engine ([`process`]).

pub mod builtins;
pub mod config;
pub mod context;
pub mod dirent;
pub mod dispatch;
pub mod error;
pub mod fat;
pub mod fatfs;
pub mod image;
pub mod lexer;
pub mod lineedit;
pub mod parser;
pub mod path;
pub mod process;
pub mod prompt;
pub mod symtab;
pub mod vfs;

pub use error::{Error, Result};

/// High-order bit that tags a built-in file-table index within the combined
/// descriptor namespace. Host descriptors never carry it.
pub const BUILTIN_FD_TAG: i32 = 0x8000;

/// The shell never hands out more than this many concurrent built-in
/// descriptors; the tag bit leaves exactly this many index values free.
pub const MAX_BUILTIN_FDS: i32 = BUILTIN_FD_TAG - 1;

/// Name of the built-in filesystem's mount point under `/`, e.g. a path
/// `/image.img/x` is served by the built-in driver rather than the host.
pub const DEFAULT_BUILTIN_ROOT: &str = "image.img";
