// Block and inode usage as rediscovered from the filesystem structures
//
// UsageTracker is written while groups are built and the tree is walked.
// freeze() turns it into FrozenUsage, the only form reconciliation accepts.

use log::debug;
use std::collections::BTreeMap;

use super::bitmap::Bitmap;
use super::constants::*;
use super::superblock::Geometry;

/// Whether `group` carries a superblock and descriptor table copy
/// under the sparse_super convention (0, 1 and powers of 3, 5, 7).
pub fn is_backup_group(group: u32, groups_count: u32) -> bool {
    if group >= groups_count {
        return false;
    }
    if group <= 1 {
        return true;
    }
    EXT2_SPARSE_SUPER_BASES.iter().any(|&base| {
        let mut power = base as u64;
        while power < group as u64 {
            power *= base as u64;
        }
        power == group as u64
    })
}

/// All groups holding backup copies, ascending
pub fn backup_groups(groups_count: u32) -> Vec<u32> {
    (0..groups_count)
        .filter(|&g| is_backup_group(g, groups_count))
        .collect()
}

/// Mutable usage state for the construction and walk phases
#[derive(Debug, Clone)]
pub struct UsageTracker {
    blocks: Bitmap,
    inodes: Bitmap,
    directories: BTreeMap<u32, u32>,
    groups_count: u32,
    inodes_per_group: u32,
}

impl UsageTracker {
    /// Size the tables for `geometry` and pre-mark what exists before any
    /// group or inode is looked at: the boot block, every superblock and
    /// descriptor table copy, and the reserved inodes except the root.
    ///
    /// Blocks and inode records past the end of the image are not tracked.
    pub fn new(geometry: &Geometry) -> Self {
        let mut tracker = Self {
            blocks: Bitmap::new(geometry.tracked_blocks() as usize),
            inodes: Bitmap::new(geometry.tracked_inodes() as usize),
            directories: BTreeMap::new(),
            groups_count: geometry.groups_count(),
            inodes_per_group: geometry.inodes_per_group,
        };

        // Reserved inodes; the root must be found by the walk
        for inode in 1..=EXT2_RESERVED_INODES {
            if inode != EXT2_ROOT_INO {
                tracker.mark_inode(inode);
            }
        }

        tracker.mark_block(0);
        tracker.mark_superblock_copies(geometry);
        tracker
    }

    fn mark_superblock_copies(&mut self, geometry: &Geometry) {
        let groups_count = geometry.groups_count();
        let copy_blocks = 1 + geometry.gdt_blocks() as u64 + geometry.reserved_gdt_blocks as u64;

        for group in backup_groups(groups_count) {
            let start = geometry.group_first_block(group);
            debug!(
                "Group {} holds a superblock copy at block {} ({} blocks)",
                group, start, copy_blocks
            );
            self.blocks.set_range(start as usize, copy_blocks as usize);
        }
    }

    pub fn mark_block(&mut self, block: u32) {
        self.blocks.set(block as usize);
    }

    pub fn mark_blocks(&mut self, start: u32, count: u32) {
        self.blocks.set_range(start as usize, count as usize);
    }

    /// Mark a 1-based inode number as in use
    pub fn mark_inode(&mut self, inode: u32) {
        if inode == 0 {
            return;
        }
        self.inodes.set(inode as usize - 1);
    }

    /// Whether `inode` has a slot in the usage table
    pub fn has_inode_slot(&self, inode: u32) -> bool {
        inode != 0 && (inode as usize - 1) < self.inodes.len()
    }

    /// Count a discovered directory against its owning group
    pub fn note_directory(&mut self, inode: u32) {
        if inode == 0 {
            return;
        }
        let group = (inode - 1) / self.inodes_per_group;
        if group < self.groups_count {
            *self.directories.entry(group).or_insert(0) += 1;
        }
    }

    pub fn is_block_used(&self, block: u32) -> bool {
        self.blocks.is_set(block as usize)
    }

    pub fn is_inode_used(&self, inode: u32) -> bool {
        inode != 0 && self.inodes.is_set(inode as usize - 1)
    }

    /// End of the discovery phases
    pub fn freeze(self) -> FrozenUsage {
        FrozenUsage {
            blocks: self.blocks,
            inodes: self.inodes,
            directories: self.directories,
        }
    }
}

/// Read-only usage, available once the whole tree has been walked
#[derive(Debug, Clone)]
pub struct FrozenUsage {
    blocks: Bitmap,
    inodes: Bitmap,
    directories: BTreeMap<u32, u32>,
}

impl FrozenUsage {
    pub fn is_block_used(&self, block: u64) -> bool {
        block < self.blocks.len() as u64 && self.blocks.is_set(block as usize)
    }

    /// Zero-based inode slot, i.e. inode number - 1
    pub fn is_inode_slot_used(&self, slot: u64) -> bool {
        slot < self.inodes.len() as u64 && self.inodes.is_set(slot as usize)
    }

    pub fn directories_in_group(&self, group: u32) -> u32 {
        self.directories.get(&group).copied().unwrap_or(0)
    }

    pub fn used_blocks(&self) -> usize {
        self.blocks.count_set()
    }

    pub fn used_inodes(&self) -> usize {
        self.inodes.count_set()
    }
}
