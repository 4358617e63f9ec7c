//! Image mapping: create or open the backing file for the built-in
//! filesystem and expose it as contiguous byte-addressable memory.
//!
//! Grounded on spec.md §4.1. Where the teacher (`CelestialMelody-fat32-rs`)
//! layered a `BlockDevice` + LRU `BlockCache` over sector reads, this engine
//! needs none of that: the whole image is mmap'd once and every cluster is
//! just a byte-offset slice of it.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Cluster size must be large enough to hold at least three 128-byte
/// directory entries, per spec.md §3 "Invariants (FAT image)".
pub const DIRENT_SIZE: u32 = 128;
pub const MIN_CLUSTER_SIZE: u32 = 3 * DIRENT_SIZE; // 384

pub const MIN_CLUSTER_SIZE_POLICY: u32 = 8 * 1024;
pub const MAX_CLUSTER_SIZE_POLICY: u32 = 16 * 1024;
pub const MIN_IMAGE_SIZE_POLICY: u64 = 5 * 1024 * 1024;
pub const MAX_IMAGE_SIZE_POLICY: u64 = 50 * 1024 * 1024;

pub const FAT_FREE: u32 = 0x0000_0000;
pub const FAT_RESERVED: u32 = 0x0000_FFFE;
pub const FAT_TERM: u32 = 0x0000_FFFF;

/// Fixed cluster index of the root directory table, per spec.md §3.
pub const ROOT_CLUSTER: u32 = 1;
/// First cluster occupied by the FAT itself.
pub const FAT_START_CLUSTER: u32 = 2;

/// Boot record occupying cluster 0: four little-endian 32-bit fields.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BootRecord {
    pub cluster_size: u32,
    pub image_len: u32,
    pub root_offset: u32,
    pub fat_offset: u32,
}

impl BootRecord {
    pub const SIZE: usize = 16;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.cluster_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.image_len.to_le_bytes());
        out[8..12].copy_from_slice(&self.root_offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.fat_offset.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            cluster_size: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            image_len: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            root_offset: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            fat_offset: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        }
    }
}

/// A memory-mapped FAT16-style image. Owns the mapping for the shell's
/// lifetime; every higher layer addresses clusters only through
/// [`Image::cluster`]/[`Image::cluster_mut`].
pub struct Image {
    mmap: MmapMut,
    boot: BootRecord,
}

/// Number of clusters the FAT itself occupies, given `total_clusters` and
/// `cluster_size`. Each FAT slot is 4 bytes despite the "FAT16" name.
pub fn fat_cluster_count(total_clusters: u32, cluster_size: u32) -> u32 {
    let fat_bytes = total_clusters as u64 * 4;
    ((fat_bytes + cluster_size as u64 - 1) / cluster_size as u64) as u32
}

fn check_geometry(size: u64, cluster_size: u32) -> Result<()> {
    if cluster_size < MIN_CLUSTER_SIZE {
        return Err(Error::Invalid(format!(
            "cluster_size {cluster_size} below minimum {MIN_CLUSTER_SIZE}"
        )));
    }
    if cluster_size % 1024 != 0 {
        return Err(Error::Invalid(format!(
            "cluster_size {cluster_size} is not a multiple of 1024"
        )));
    }
    if !(MIN_CLUSTER_SIZE_POLICY..=MAX_CLUSTER_SIZE_POLICY).contains(&cluster_size) {
        return Err(Error::Invalid(format!(
            "cluster_size {cluster_size} outside policy range [{MIN_CLUSTER_SIZE_POLICY}, {MAX_CLUSTER_SIZE_POLICY}]"
        )));
    }
    if !(MIN_IMAGE_SIZE_POLICY..=MAX_IMAGE_SIZE_POLICY).contains(&size) {
        return Err(Error::Invalid(format!(
            "image size {size} outside policy range [{MIN_IMAGE_SIZE_POLICY}, {MAX_IMAGE_SIZE_POLICY}]"
        )));
    }
    Ok(())
}

impl Image {
    /// Create the image if `path` does not exist, otherwise open and map
    /// the existing one (re-reading its own header for size/geometry).
    ///
    /// `size`/`cluster_size` are only consulted on creation; opening an
    /// existing image never re-initializes it.
    pub fn init_or_open(path: &Path, size: u64, cluster_size: u32, allow_override: bool) -> Result<Self> {
        if path.exists() {
            return Self::open(path);
        }
        if !allow_override {
            check_geometry(size, cluster_size)?;
        }
        Self::create(path, size, cluster_size)
    }

    fn create(path: &Path, size: u64, cluster_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let total_clusters = (size / cluster_size as u64) as u32;
        let fat_clusters = fat_cluster_count(total_clusters, cluster_size);

        let boot = BootRecord {
            cluster_size,
            image_len: size as u32,
            root_offset: ROOT_CLUSTER,
            fat_offset: FAT_START_CLUSTER,
        };
        mmap[0..BootRecord::SIZE].copy_from_slice(&boot.to_bytes());

        let mut image = Image { mmap, boot };

        // Reserved clusters (boot, root, FAT span) are marked TERM so a
        // linear FREE scan never allocates over them.
        image.set_fat_entry(0, FAT_TERM);
        image.set_fat_entry(ROOT_CLUSTER, FAT_TERM);
        for i in 0..fat_clusters {
            image.set_fat_entry(FAT_START_CLUSTER + i, FAT_TERM);
        }

        // Zero the root directory's data cluster, then write `.`/`..`
        // pointing at itself (root's parent is itself, per spec.md §3).
        image.zero_cluster(ROOT_CLUSTER);

        image.sync();
        Ok(image)
    }

    fn open(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < BootRecord::SIZE {
            return Err(Error::Corrupt("image shorter than boot record".into()));
        }
        let boot = BootRecord::from_bytes(&mmap[0..BootRecord::SIZE]);
        if (boot.image_len as usize) > mmap.len() {
            return Err(Error::Corrupt("boot record declares a longer image than the file".into()));
        }
        // Re-map to exactly the declared length if the file is larger.
        if (boot.image_len as usize) < mmap.len() {
            drop(mmap);
            let mut m = unsafe { MmapMut::map_mut(&file)? };
            m.flush()?;
            mmap = m;
        }
        Ok(Image { mmap, boot })
    }

    pub fn boot(&self) -> BootRecord {
        self.boot
    }

    pub fn cluster_size(&self) -> u32 {
        self.boot.cluster_size
    }

    pub fn total_clusters(&self) -> u32 {
        self.boot.image_len / self.boot.cluster_size
    }

    /// `addr_of(idx) = base + idx * cluster_size`, per spec.md §4.2.
    fn offset_of(&self, idx: u32) -> usize {
        idx as usize * self.boot.cluster_size as usize
    }

    pub fn cluster(&self, idx: u32) -> &[u8] {
        let off = self.offset_of(idx);
        &self.mmap[off..off + self.boot.cluster_size as usize]
    }

    pub fn cluster_mut(&mut self, idx: u32) -> &mut [u8] {
        let off = self.offset_of(idx);
        let sz = self.boot.cluster_size as usize;
        &mut self.mmap[off..off + sz]
    }

    pub fn zero_cluster(&mut self, idx: u32) {
        self.cluster_mut(idx).fill(0);
    }

    /// Read the FAT slot for cluster `idx`. Setting an out-of-range index is
    /// a no-op; reading one returns `FAT_RESERVED`, per spec.md §4.2.
    pub fn fat_entry(&self, idx: u32) -> u32 {
        if idx >= self.total_clusters() {
            return FAT_RESERVED;
        }
        let per_cluster = self.boot.cluster_size / 4;
        let cluster = self.boot.fat_offset + idx / per_cluster;
        let offset = (idx % per_cluster) as usize * 4;
        let bytes = self.cluster(cluster);
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    pub fn set_fat_entry(&mut self, idx: u32, value: u32) {
        if idx >= self.total_clusters() {
            return;
        }
        let per_cluster = self.boot.cluster_size / 4;
        let cluster = self.boot.fat_offset + idx / per_cluster;
        let offset = (idx % per_cluster) as usize * 4;
        let bytes = self.cluster_mut(cluster);
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// msync the whole image. Called on every directory-modifying operation
    /// and on file close, per spec.md §3 "Lifecycles".
    pub fn sync(&mut self) {
        let _ = self.mmap.flush();
    }

    /// msync just the clusters backing `idx..idx+len_clusters`, the
    /// granularity `close()` needs (spec.md §4.2 "Close").
    pub fn sync_range(&mut self, idx: u32, len_clusters: u32) {
        let off = self.offset_of(idx);
        let len = len_clusters as usize * self.boot.cluster_size as usize;
        let _ = self.mmap.flush_range(off, len);
    }
}
