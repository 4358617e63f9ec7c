//! FAT16-style cluster allocation and chain traversal.
//!
//! Grounded on the teacher's `fat.rs` (`ClusterChain`/`FatManager`): a linear
//! FREE scan for allocation, a chain-follow walker, a small recycled-cluster
//! list to skip re-scanning just-freed slots. Adapted from block-device
//! sector reads to direct indexing into the mmap'd [`Image`].

use crate::error::{Error, Result};
use crate::image::{Image, FAT_FREE, FAT_RESERVED, FAT_TERM};

/// "Walk to the tail" sentinel for [`Fat::follow`], matching spec.md §4.2's
/// "passing a negative or maximal n".
pub const WALK_TO_TAIL: u32 = u32::MAX;

pub struct Fat {
    recycled: Vec<u32>,
}

impl Fat {
    pub fn new() -> Self {
        Self {
            recycled: Vec::new(),
        }
    }

    /// Linear scan of the FAT for the first `FREE` slot. Zeroes the
    /// cluster's data before returning it, per spec.md §4.2 "Cluster
    /// allocation". Fails with `NoSpace`.
    pub fn alloc(&mut self, image: &mut Image) -> Result<u32> {
        let idx = if let Some(idx) = self.recycled.pop() {
            idx
        } else {
            self.find_free(image)?
        };
        image.zero_cluster(idx);
        Ok(idx)
    }

    fn find_free(&self, image: &Image) -> Result<u32> {
        let total = image.total_clusters();
        for idx in 0..total {
            if image.fat_entry(idx) == FAT_FREE {
                return Ok(idx);
            }
        }
        Err(Error::NoSpace)
    }

    pub fn recycle(&mut self, image: &mut Image, idx: u32) {
        image.set_fat_entry(idx, FAT_FREE);
        self.recycled.push(idx);
    }

    /// Walk `n` links starting at `head`, stopping early at `TERM`.
    /// `n == WALK_TO_TAIL` walks to the last cluster of the chain; this is
    /// how appends find the tail to extend. Encountering `FREE` or
    /// `RESERVED` mid-chain is `Corrupt` (fatal, per spec.md §4.2).
    pub fn follow(&self, image: &Image, head: u32, n: u32) -> Result<u32> {
        let mut cur = head;
        let mut steps = 0u32;
        loop {
            let next = image.fat_entry(cur);
            if n != WALK_TO_TAIL && steps == n {
                return Ok(cur);
            }
            if next == FAT_TERM {
                return Ok(cur);
            }
            if next == FAT_FREE || next == FAT_RESERVED {
                return Err(Error::Corrupt(format!(
                    "encountered {} cluster mid-chain at cluster {cur}",
                    if next == FAT_FREE { "FREE" } else { "RESERVED" }
                )));
            }
            cur = next;
            steps += 1;
        }
    }

    /// Extend `head`'s chain by one cluster, returning the new cluster's
    /// index. The new cluster is marked `TERM` and the previous tail is
    /// linked to it.
    pub fn extend(&mut self, image: &mut Image, head: u32) -> Result<u32> {
        let tail = self.follow(image, head, WALK_TO_TAIL)?;
        let new_cluster = self.alloc(image)?;
        image.set_fat_entry(new_cluster, FAT_TERM);
        image.set_fat_entry(tail, new_cluster);
        Ok(new_cluster)
    }

    /// Free every cluster in `head`'s chain except `head` itself, resetting
    /// `head` to `TERM`. Used by truncate/unlink (spec.md §4.2).
    pub fn free_tail(&mut self, image: &mut Image, head: u32) -> Result<()> {
        let mut cur = image.fat_entry(head);
        image.set_fat_entry(head, FAT_TERM);
        while cur != FAT_TERM {
            if cur == FAT_FREE || cur == FAT_RESERVED {
                return Err(Error::Corrupt("free/reserved cluster mid-chain during free".into()));
            }
            let next = image.fat_entry(cur);
            self.recycle(image, cur);
            cur = next;
        }
        Ok(())
    }

    /// Free an entire chain starting at and including `head` (unlink).
    pub fn free_chain(&mut self, image: &mut Image, head: u32) -> Result<()> {
        let mut cur = head;
        loop {
            let next = image.fat_entry(cur);
            self.recycle(image, cur);
            if next == FAT_TERM {
                return Ok(());
            }
            if next == FAT_FREE || next == FAT_RESERVED {
                return Err(Error::Corrupt("free/reserved cluster mid-chain during unlink".into()));
            }
            cur = next;
        }
    }

    /// Number of clusters reachable from `head` (chain length, minimum 1).
    pub fn chain_len(&self, image: &Image, head: u32) -> Result<u32> {
        let mut len = 1u32;
        let mut cur = head;
        loop {
            let next = image.fat_entry(cur);
            if next == FAT_TERM {
                return Ok(len);
            }
            if next == FAT_FREE || next == FAT_RESERVED {
                return Err(Error::Corrupt("free/reserved cluster mid-chain".into()));
            }
            cur = next;
            len += 1;
        }
    }

    /// Count of `FREE` slots across the whole FAT, for the cluster-
    /// accounting testable property in spec.md §8.
    pub fn free_count(&self, image: &Image) -> u32 {
        (0..image.total_clusters())
            .filter(|&idx| image.fat_entry(idx) == FAT_FREE)
            .count() as u32
    }
}

impl Default for Fat {
    fn default() -> Self {
        Self::new()
    }
}
