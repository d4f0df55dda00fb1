// Block groups: descriptor parsing, structural usage and bitmap reconciliation

use byteorder::{LittleEndian, ReadBytesExt};
use e2audit_core::{AuditError, ByteMedium};
use log::{debug, warn};
use serde::Serialize;
use std::io::Cursor;

use super::bitmap::Bitmap;
use super::constants::*;
use super::inode::InodeLookupError;
use super::superblock::Geometry;
use super::usage::{FrozenUsage, UsageTracker};

/// On-disk ext2 group descriptor (32 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupDescriptor {
    pub bg_block_bitmap: u32,
    pub bg_inode_bitmap: u32,
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
}

impl GroupDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuditError> {
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            bg_block_bitmap: cursor.read_u32::<LittleEndian>()?,
            bg_inode_bitmap: cursor.read_u32::<LittleEndian>()?,
            bg_inode_table: cursor.read_u32::<LittleEndian>()?,
            bg_free_blocks_count: cursor.read_u16::<LittleEndian>()?,
            bg_free_inodes_count: cursor.read_u16::<LittleEndian>()?,
            bg_used_dirs_count: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// One block group and the errors found in it.
///
/// A group with construction errors is broken: its inodes cannot be looked
/// up and it is never reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct BlockGroup {
    pub index: u32,
    pub descriptor: Option<GroupDescriptor>,
    pub inode_table_size: u32,
    pub errors: Vec<String>,
}

impl BlockGroup {
    /// Read descriptor `index` and mark the group's bitmaps and inode table.
    pub fn construct<M: ByteMedium + ?Sized>(
        geometry: &Geometry,
        index: u32,
        tracker: &mut UsageTracker,
        medium: &mut M,
    ) -> Self {
        let mut group = Self {
            index,
            descriptor: None,
            inode_table_size: geometry.inode_table_blocks(),
            errors: Vec::new(),
        };

        let offset = geometry.descriptor_offset(index);
        if offset + EXT2_GROUP_DESC_SIZE > geometry.filesystem_size {
            group.add_error("Group descriptor lies outside the filesystem".to_string());
            return group;
        }
        let descriptor = match medium
            .read_at(offset, EXT2_GROUP_DESC_SIZE as usize)
            .and_then(|bytes| GroupDescriptor::parse(&bytes))
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                group.add_error(format!("Group descriptor cannot be read: {}", e));
                return group;
            }
        };
        group.descriptor = Some(descriptor);
        debug!("Group {}: {:?}", index, descriptor);

        let table_start = descriptor.bg_inode_table as u64;
        if table_start + group.inode_table_size as u64 >= geometry.blocks_count as u64 {
            group.add_error(format!(
                "Inode table is in invalid block {}",
                descriptor.bg_inode_table
            ));
            return group;
        }
        tracker.mark_blocks(descriptor.bg_inode_table, group.inode_table_size);

        if descriptor.bg_block_bitmap >= geometry.blocks_count {
            group.add_error(format!(
                "Block bitmap references nonexistent block {}",
                descriptor.bg_block_bitmap
            ));
        }
        if descriptor.bg_inode_bitmap >= geometry.blocks_count {
            group.add_error(format!(
                "Inode bitmap references nonexistent block {}",
                descriptor.bg_inode_bitmap
            ));
        }
        if group.is_broken() {
            return group;
        }

        tracker.mark_block(descriptor.bg_block_bitmap);
        tracker.mark_block(descriptor.bg_inode_bitmap);
        group
    }

    pub fn is_broken(&self) -> bool {
        !self.errors.is_empty()
    }

    fn add_error(&mut self, msg: String) {
        warn!("Block group {}: {}", self.index, msg);
        self.errors.push(msg);
    }

    /// Read the raw record of `inode`, which must belong to this group
    pub fn read_inode<M: ByteMedium + ?Sized>(
        &self,
        geometry: &Geometry,
        inode: u32,
        medium: &mut M,
    ) -> Result<Vec<u8>, InodeLookupError> {
        let descriptor = match (self.is_broken(), self.descriptor) {
            (false, Some(descriptor)) => descriptor,
            _ => {
                return Err(InodeLookupError::BrokenGroup {
                    inode,
                    group: self.index,
                })
            }
        };

        let offset = geometry.block_offset(descriptor.bg_inode_table)
            + geometry.inode_size as u64 * geometry.inode_index(inode) as u64;
        medium
            .read_at(offset, EXT2_INODE_RECORD_SIZE)
            .map_err(|e| InodeLookupError::Unreadable {
                inode,
                reason: e.to_string(),
            })
    }

    /// Compare discovered usage against this group's on-disk bitmaps and counters.
    ///
    /// Taking `FrozenUsage` means the walk of the whole filesystem is over.
    pub fn reconcile<M: ByteMedium + ?Sized>(
        &mut self,
        geometry: &Geometry,
        usage: &FrozenUsage,
        medium: &mut M,
    ) {
        let descriptor = match (self.is_broken(), self.descriptor) {
            (false, Some(descriptor)) => descriptor,
            _ => return,
        };

        let block_bitmap = match self.read_bitmap(
            geometry,
            medium,
            descriptor.bg_block_bitmap,
            geometry.blocks_per_group,
        ) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                self.add_error(format!("Block bitmap cannot be read: {}", e));
                return;
            }
        };
        let inode_bitmap = match self.read_bitmap(
            geometry,
            medium,
            descriptor.bg_inode_bitmap,
            geometry.inodes_per_group,
        ) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                self.add_error(format!("Inode bitmap cannot be read: {}", e));
                return;
            }
        };

        self.reconcile_blocks(geometry, usage, &block_bitmap, descriptor);
        self.reconcile_inodes(geometry, usage, &inode_bitmap, descriptor);

        let found_dirs = usage.directories_in_group(self.index);
        if descriptor.bg_used_dirs_count as u32 != found_dirs {
            self.add_error(format!(
                "Incorrect used directories count (is {}, found {})",
                descriptor.bg_used_dirs_count, found_dirs
            ));
        }
    }

    fn read_bitmap<M: ByteMedium + ?Sized>(
        &self,
        geometry: &Geometry,
        medium: &mut M,
        block: u32,
        bits: u32,
    ) -> Result<Bitmap, AuditError> {
        let bytes = medium.read_at(geometry.block_offset(block), bits.div_ceil(8) as usize)?;
        Ok(Bitmap::from_bytes(&bytes, bits as usize))
    }

    fn reconcile_blocks(
        &mut self,
        geometry: &Geometry,
        usage: &FrozenUsage,
        bitmap: &Bitmap,
        descriptor: GroupDescriptor,
    ) {
        let first = geometry.group_first_block(self.index);
        let mut free = 0u32;

        for i in 0..geometry.blocks_per_group {
            let block = first + i as u64;
            if block >= geometry.blocks_count as u64 {
                break;
            }

            let real = usage.is_block_used(block);
            let stored = bitmap.is_set(i as usize);
            if real != stored {
                self.add_error(format!(
                    "Block {} is marked incorrectly in the bitmap (should be {})",
                    block,
                    if real { "used" } else { "free" }
                ));
            }
            if !stored {
                free += 1;
            }
        }

        if descriptor.bg_free_blocks_count as u32 != free {
            self.add_error(format!(
                "Incorrect free blocks count (is {}, bitmap has {})",
                descriptor.bg_free_blocks_count, free
            ));
        }
    }

    fn reconcile_inodes(
        &mut self,
        geometry: &Geometry,
        usage: &FrozenUsage,
        bitmap: &Bitmap,
        descriptor: GroupDescriptor,
    ) {
        let first = self.index as u64 * geometry.inodes_per_group as u64;

        for i in 0..geometry.inodes_per_group {
            let slot = first + i as u64;
            let real = usage.is_inode_slot_used(slot);
            if real != bitmap.is_set(i as usize) {
                self.add_error(format!(
                    "Inode {} is marked incorrectly in the bitmap (should be {})",
                    slot + 1,
                    if real { "used" } else { "free" }
                ));
            }
        }

        let free = bitmap.count_free() as u32;
        if descriptor.bg_free_inodes_count as u32 != free {
            self.add_error(format!(
                "Incorrect free inodes count (is {}, bitmap has {})",
                descriptor.bg_free_inodes_count, free
            ));
        }
    }
}
