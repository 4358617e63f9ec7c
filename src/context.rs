//! The shell's single owned state bundle, threaded through the dispatcher,
//! built-ins, and prompt formatter instead of mutable globals.
//!
//! Grounded on spec.md §9 Design Notes ("thread shared state through an
//! explicit context struct rather than C's file-scope globals") and the
//! original `rsh.h`'s top-level globals (`file_descriptors`,
//! `rsh_history_stack`, the live process-group table) collapsed into one
//! struct.

use std::path::PathBuf;

use crate::error::Result;
use crate::fatfs::FileSystem;
use crate::image::Image;
use crate::process::ProcessGroupTable;
use crate::symtab::SymbolTable;
use crate::vfs::Vfs;

/// Command-line/runtime configuration consulted at startup, set once and
/// read thereafter (spec.md §6).
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub debug: bool,
    pub login: bool,
    pub image_path: PathBuf,
    pub image_size: u64,
    pub cluster_size: u32,
    pub allow_geometry_override: bool,
    pub script: Option<PathBuf>,
    pub script_args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            debug: false,
            login: false,
            image_path: PathBuf::from(crate::DEFAULT_BUILTIN_ROOT),
            image_size: crate::image::MIN_IMAGE_SIZE_POLICY,
            cluster_size: crate::image::MIN_CLUSTER_SIZE_POLICY,
            allow_geometry_override: false,
            script: None,
            script_args: Vec::new(),
        }
    }
}

/// Everything the dispatcher, built-ins, and prompt formatter need: the
/// VFS (which owns the file-table and the built-in FAT engine), the
/// process-group table, the symbol table, and the config the shell was
/// started with.
pub struct ShellContext {
    pub vfs: Vfs,
    pub processes: ProcessGroupTable,
    pub symtab: SymbolTable,
    pub config: ShellConfig,
    pub last_status: i32,
}

impl ShellContext {
    pub fn new(config: ShellConfig, terminal_fd: std::os::fd::RawFd) -> Result<Self> {
        let image = Image::init_or_open(
            &config.image_path,
            config.image_size,
            config.cluster_size,
            config.allow_geometry_override,
        )?;
        let fat = FileSystem::new(image);
        let builtin_root = config
            .image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::DEFAULT_BUILTIN_ROOT.to_string());
        let vfs = Vfs::new(fat, builtin_root);
        let processes = ProcessGroupTable::new(terminal_fd)?;
        Ok(Self {
            vfs,
            processes,
            symtab: SymbolTable::new(),
            config,
            last_status: 0,
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.processes.interactive() && self.config.script.is_none()
    }
}
