//! The FAT16-style filesystem engine: path resolution and file/directory
//! I/O on top of the mmap'd [`Image`] and the [`Fat`] allocator.
//!
//! Grounded on the teacher's `fs.rs`/`vfs.rs` split (a `FileSystem` owning
//! the device and FAT manager, a lightweight per-open-file handle wrapping
//! it) and `dir.rs`'s `find`/`create`/`ls` shape, simplified to spec.md's
//! single-entry 128-byte dirents (no long-name split).

use bitflags::bitflags;

use crate::dirent::{self, DirEntry, DirEntryPos, TYPE_DIR, TYPE_FILE};
use crate::error::{Error, Result};
use crate::fat::Fat;
use crate::image::{Image, ROOT_CLUSTER};
use crate::path;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CREAT  = 0b0001;
        const TRUNC  = 0b0010;
        const APPEND = 0b0100;
    }
}

/// A resolved handle to an open built-in file or directory: the directory
/// entry's position, a copy of its current contents, and an I/O offset.
/// Mutating methods write the dirent back through `fs`.
pub struct Handle {
    pub pos: DirEntryPos,
    pub entry: DirEntry,
    pub offset: u32,
    /// readdir's scan cursor; `None` until the first `readdir` call.
    pub readdir_cursor: Option<u32>,
}

pub struct FileSystem {
    image: Image,
    fat: Fat,
}

impl FileSystem {
    /// Wrap an already-mapped image. On a freshly created image the root
    /// cluster is all zero bytes; bootstrap its `.`/`..` entries the first
    /// time they're found missing (root's `..` points at itself, spec.md
    /// §3).
    pub fn new(mut image: Image) -> Self {
        let root_dot = dirent::read_entry(&image, DirEntryPos { cluster: ROOT_CLUSTER, slot: 0 });
        if root_dot.is_empty_slot() {
            let _ = dirent::write_dot_entries(&mut image, ROOT_CLUSTER, ROOT_CLUSTER);
            image.sync();
        }
        Self {
            image,
            fat: Fat::new(),
        }
    }

    pub fn cluster_size(&self) -> u32 {
        self.image.cluster_size()
    }

    fn root_pos(&self) -> DirEntryPos {
        DirEntryPos {
            cluster: ROOT_CLUSTER,
            slot: 0,
        }
    }

    /// Resolve an absolute, already dot-interpolated path to its directory
    /// entry. Spec.md §4.2 "Path -> dirent". The root itself has no stored
    /// dirent (it is addressed directly by `ROOT_CLUSTER`); a synthetic
    /// `DIR` entry is returned for `components == []`.
    pub fn resolve(&self, components: &[String]) -> Result<(DirEntryPos, DirEntry)> {
        let mut pos = self.root_pos();
        let mut entry = dirent::read_entry(&self.image, pos);
        entry.first_cluster = ROOT_CLUSTER;
        entry.kind = TYPE_DIR;

        let mut current_cluster = ROOT_CLUSTER;
        for (i, name) in components.iter().enumerate() {
            if !entry.is_dir() {
                return Err(Error::NotDir(name.clone()));
            }
            match dirent::find(&self.image, &self.fat, current_cluster, name)? {
                None => return Err(Error::NoEnt(name.clone())),
                Some((found_pos, found_entry)) => {
                    if i + 1 < components.len() && found_entry.is_file() {
                        return Err(Error::NotDir(name.clone()));
                    }
                    if !found_entry.is_file() && !found_entry.is_dir() {
                        return Err(Error::Corrupt(format!(
                            "unknown dirent type {} for {name:?}",
                            found_entry.kind
                        )));
                    }
                    pos = found_pos;
                    current_cluster = found_entry.first_cluster;
                    entry = found_entry;
                }
            }
        }
        Ok((pos, entry))
    }

    /// `open` per spec.md §4.2. `flags` follow the preconditions there:
    /// `APPEND + TRUNC` is `Invalid`.
    pub fn open(&mut self, abs_path: &str, flags: OpenFlags) -> Result<Handle> {
        if flags.contains(OpenFlags::APPEND) && flags.contains(OpenFlags::TRUNC) {
            return Err(Error::Invalid("APPEND and TRUNC together".into()));
        }
        let (parent_components, leaf) = path::split_parent_leaf(abs_path);
        let (parent_pos, parent_entry) = self.resolve(&parent_components)?;
        let parent_cluster = if parent_components.is_empty() {
            ROOT_CLUSTER
        } else {
            parent_entry.first_cluster
        };
        let _ = parent_pos;

        if leaf.is_empty() {
            // Opening "/" itself as a directory handle.
            let (pos, entry) = self.resolve(&[])?;
            return Ok(Handle {
                pos,
                entry,
                offset: 0,
                readdir_cursor: None,
            });
        }

        match dirent::find(&self.image, &self.fat, parent_cluster, &leaf)? {
            Some((pos, mut entry)) => {
                if flags.contains(OpenFlags::TRUNC) {
                    self.fat.free_tail(&mut self.image, entry.first_cluster)?;
                    entry.size = 0;
                    dirent::write_entry(&mut self.image, pos, entry);
                    self.image.sync();
                }
                let offset = if flags.contains(OpenFlags::APPEND) {
                    entry.size
                } else {
                    0
                };
                Ok(Handle {
                    pos,
                    entry,
                    offset,
                    readdir_cursor: None,
                })
            }
            None => {
                if !flags.contains(OpenFlags::CREAT) {
                    return Err(Error::NoEnt(leaf));
                }
                let slot = dirent::alloc_slot(&mut self.image, &mut self.fat, parent_cluster)?;
                let first_cluster = self.fat.alloc(&mut self.image)?;
                self.image.set_fat_entry(first_cluster, crate::image::FAT_TERM);
                let entry = DirEntry::new(&leaf, first_cluster, TYPE_FILE)?;
                dirent::write_entry(&mut self.image, slot, entry);
                self.image.sync();
                Ok(Handle {
                    pos: slot,
                    entry,
                    offset: 0,
                    readdir_cursor: None,
                })
            }
        }
    }

    /// `read` per spec.md §4.2: copy bytes from the file's offset forward,
    /// cluster by cluster, returning the number of bytes transferred (0 on
    /// EOF).
    pub fn read(&mut self, handle: &mut Handle, buf: &mut [u8]) -> Result<usize> {
        let cluster_size = self.cluster_size();
        let mut total = 0usize;
        while total < buf.len() && handle.offset < handle.entry.size {
            let cluster_idx = handle.offset / cluster_size;
            let in_cluster_offset = (handle.offset % cluster_size) as usize;
            let cluster = self.fat.follow(&self.image, handle.entry.first_cluster, cluster_idx)?;
            let remaining_in_cluster = cluster_size as usize - in_cluster_offset;
            let remaining_in_file = (handle.entry.size - handle.offset) as usize;
            let want = (buf.len() - total)
                .min(remaining_in_cluster)
                .min(remaining_in_file);
            if want == 0 {
                break;
            }
            let data = self.image.cluster(cluster);
            buf[total..total + want]
                .copy_from_slice(&data[in_cluster_offset..in_cluster_offset + want]);
            total += want;
            handle.offset += want as u32;
        }
        Ok(total)
    }

    /// `write` per spec.md §4.2: extend the chain when the write runs past
    /// its end; partial-cluster writes preserve the unwritten remainder of
    /// the destination cluster.
    pub fn write(&mut self, handle: &mut Handle, buf: &[u8]) -> Result<usize> {
        let cluster_size = self.cluster_size();
        let mut total = 0usize;
        while total < buf.len() {
            let cluster_idx = handle.offset / cluster_size;
            let in_cluster_offset = (handle.offset % cluster_size) as usize;

            let existing_len = self.fat.chain_len(&self.image, handle.entry.first_cluster)?;
            let cluster = if cluster_idx < existing_len {
                self.fat.follow(&self.image, handle.entry.first_cluster, cluster_idx)?
            } else {
                self.fat.extend(&mut self.image, handle.entry.first_cluster)?
            };

            let want = (buf.len() - total).min(cluster_size as usize - in_cluster_offset);
            let data = self.image.cluster_mut(cluster);
            data[in_cluster_offset..in_cluster_offset + want]
                .copy_from_slice(&buf[total..total + want]);

            total += want;
            handle.offset += want as u32;
        }
        handle.entry.size = handle.entry.size.max(handle.offset);
        dirent::write_entry(&mut self.image, handle.pos, handle.entry);
        self.image.sync();
        Ok(total)
    }

    /// Stateful readdir: emits one entry per call, `None` once an empty
    /// slot terminates the directory (spec.md §4.2 "Readdir"). Not
    /// reentrant across different handles on the same directory.
    pub fn readdir(&self, handle: &mut Handle) -> Result<Option<DirEntry>> {
        if !handle.entry.is_dir() {
            return Err(Error::NotSup("readdir on a non-directory"));
        }
        let positions = dirent::iter_positions(&self.image, &self.fat, handle.entry.first_cluster)?;
        let next_slot = handle.readdir_cursor.unwrap_or(0) as usize;
        if next_slot >= positions.len() {
            return Ok(None);
        }
        let entry = dirent::read_entry(&self.image, positions[next_slot]);
        if entry.is_empty_slot() {
            return Ok(None);
        }
        handle.readdir_cursor = Some(next_slot as u32 + 1);
        Ok(Some(entry))
    }

    /// `mkdir` per spec.md §4.2: reject existing same-name child, allocate
    /// a dirent slot and a fresh cluster, write `.`/`..`.
    pub fn mkdir(&mut self, abs_path: &str) -> Result<()> {
        let (parent_components, leaf) = path::split_parent_leaf(abs_path);
        if leaf.is_empty() {
            return Err(Error::Invalid("mkdir requires a non-empty name".into()));
        }
        let (_, parent_entry) = self.resolve(&parent_components)?;
        let parent_cluster = if parent_components.is_empty() {
            ROOT_CLUSTER
        } else {
            parent_entry.first_cluster
        };

        if dirent::find(&self.image, &self.fat, parent_cluster, &leaf)?.is_some() {
            return Err(Error::Exists(leaf));
        }

        let slot = dirent::alloc_slot(&mut self.image, &mut self.fat, parent_cluster)?;
        let new_cluster = self.fat.alloc(&mut self.image)?;
        self.image.set_fat_entry(new_cluster, crate::image::FAT_TERM);
        dirent::write_dot_entries(&mut self.image, new_cluster, parent_cluster)?;
        let entry = DirEntry::new(&leaf, new_cluster, TYPE_DIR)?;
        dirent::write_entry(&mut self.image, slot, entry);
        self.image.sync();
        Ok(())
    }

    /// `unlink` per spec.md §4.2: free every cluster in the chain, mark the
    /// dirent slot empty. Leaves the rest of the dirent's bytes intact
    /// (spec.md §9 ambiguous-behavior note (a)).
    pub fn unlink(&mut self, abs_path: &str) -> Result<()> {
        let (parent_components, leaf) = path::split_parent_leaf(abs_path);
        let (_, parent_entry) = self.resolve(&parent_components)?;
        let parent_cluster = if parent_components.is_empty() {
            ROOT_CLUSTER
        } else {
            parent_entry.first_cluster
        };
        let (pos, entry) = dirent::find(&self.image, &self.fat, parent_cluster, &leaf)?
            .ok_or_else(|| Error::NoEnt(leaf.clone()))?;
        self.fat.free_chain(&mut self.image, entry.first_cluster)?;
        dirent::mark_empty(&mut self.image, pos);
        self.image.sync();
        Ok(())
    }

    /// `close` per spec.md §4.2: msync every cluster of the file's chain.
    pub fn close(&mut self, handle: &Handle) -> Result<()> {
        let mut cluster = handle.entry.first_cluster;
        loop {
            self.image.sync_range(cluster, 1);
            let next = self.image.fat_entry(cluster);
            if next == crate::image::FAT_TERM {
                break;
            }
            if next == crate::image::FAT_FREE || next == crate::image::FAT_RESERVED {
                return Err(Error::Corrupt("free/reserved cluster mid-chain on close".into()));
            }
            cluster = next;
        }
        Ok(())
    }

    /// Free-slot + reachable-cluster accounting for the property in
    /// spec.md §8: FREE + reachable-from-dirents + reserved == total.
    pub fn free_cluster_count(&self) -> u32 {
        self.fat.free_count(&self.image)
    }

    pub fn total_clusters(&self) -> u32 {
        self.image.total_clusters()
    }
}
