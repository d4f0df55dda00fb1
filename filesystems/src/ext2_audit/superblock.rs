// Superblock parsing and the immutable geometry derived from it

use byteorder::{LittleEndian, ReadBytesExt};
use e2audit_core::{AuditError, ByteMedium};
use log::{debug, info};
use serde::Serialize;
use std::io::Cursor;

use super::constants::*;

/// The subset of the ext2 superblock the auditor consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_blocks_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_rev_level: u32,
    pub s_inode_size: u16,
    pub s_reserved_gdt_blocks: u16,
    pub s_volume_name: [u8; 16],
}

impl Superblock {
    /// Decode a superblock from its 1024-byte on-disk record
    pub fn parse(bytes: &[u8]) -> Result<Self, AuditError> {
        let mut cursor = Cursor::new(bytes);
        let mut sb = Superblock {
            s_inodes_count: cursor.read_u32::<LittleEndian>()?,
            s_blocks_count: cursor.read_u32::<LittleEndian>()?,
            s_r_blocks_count: cursor.read_u32::<LittleEndian>()?,
            s_free_blocks_count: cursor.read_u32::<LittleEndian>()?,
            s_free_inodes_count: cursor.read_u32::<LittleEndian>()?,
            s_first_data_block: cursor.read_u32::<LittleEndian>()?,
            s_log_block_size: cursor.read_u32::<LittleEndian>()?,
            ..Default::default()
        };

        cursor.set_position(0x20);
        sb.s_blocks_per_group = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(0x28);
        sb.s_inodes_per_group = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(0x38);
        sb.s_magic = cursor.read_u16::<LittleEndian>()?;
        sb.s_state = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(0x4C);
        sb.s_rev_level = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(0x58);
        sb.s_inode_size = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(0x78);
        std::io::Read::read_exact(&mut cursor, &mut sb.s_volume_name)?;
        cursor.set_position(0xCE);
        sb.s_reserved_gdt_blocks = cursor.read_u16::<LittleEndian>()?;

        Ok(sb)
    }

    /// Inode record size, honouring the fixed size of revision 0 filesystems
    pub fn inode_size(&self) -> u16 {
        if self.s_rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.s_inode_size
        }
    }

    pub fn volume_name(&self) -> String {
        String::from_utf8_lossy(&self.s_volume_name)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }
}

/// Filesystem geometry, fixed once the superblock has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub block_size: u32,
    pub blocks_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inodes_count: u32,
    pub inode_size: u16,
    pub reserved_gdt_blocks: u32,
    pub first_data_block: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub filesystem_size: u64,
    pub volume_name: String,
}

impl Geometry {
    /// Read and validate the superblock of `medium`.
    ///
    /// A truncated image, a wrong magic number or nonsensical geometry is fatal.
    pub fn read<M: ByteMedium + ?Sized>(medium: &mut M) -> Result<Self, AuditError> {
        let filesystem_size = medium.size();
        if EXT2_BOOT_SIZE + EXT2_SUPERBLOCK_SIZE > filesystem_size {
            return Err(AuditError::OutOfRange(format!(
                "superblock lies outside the image ({} bytes)",
                filesystem_size
            )));
        }

        let bytes = medium.read_at(EXT2_BOOT_SIZE, EXT2_SUPERBLOCK_SIZE as usize)?;
        let sb = Superblock::parse(&bytes)?;
        Self::from_superblock(&sb, filesystem_size)
    }

    pub fn from_superblock(sb: &Superblock, filesystem_size: u64) -> Result<Self, AuditError> {
        if sb.s_magic != EXT2_SUPER_MAGIC {
            return Err(AuditError::NotExt2 {
                found: sb.s_magic,
                expected: EXT2_SUPER_MAGIC,
            });
        }

        if sb.s_log_block_size > EXT2_MAX_LOG_BLOCK_SIZE {
            return Err(AuditError::InvalidGeometry(format!(
                "log block size {} is too large",
                sb.s_log_block_size
            )));
        }
        let block_size = EXT2_MIN_BLOCK_SIZE << sb.s_log_block_size;
        let bitmap_bits = block_size * 8;

        if sb.s_blocks_per_group == 0 || sb.s_blocks_per_group > bitmap_bits {
            return Err(AuditError::InvalidGeometry(format!(
                "{} blocks per group does not fit a {} byte bitmap",
                sb.s_blocks_per_group, block_size
            )));
        }
        if sb.s_inodes_per_group == 0 || sb.s_inodes_per_group > bitmap_bits {
            return Err(AuditError::InvalidGeometry(format!(
                "{} inodes per group does not fit a {} byte bitmap",
                sb.s_inodes_per_group, block_size
            )));
        }
        let inode_size = sb.inode_size();
        if (inode_size as usize) < EXT2_INODE_RECORD_SIZE || inode_size as u32 > block_size {
            return Err(AuditError::InvalidGeometry(format!(
                "inode size {} is outside 128..={}",
                inode_size, block_size
            )));
        }
        if sb.s_first_data_block >= sb.s_blocks_count {
            return Err(AuditError::InvalidGeometry(format!(
                "first data block {} is beyond {} blocks",
                sb.s_first_data_block, sb.s_blocks_count
            )));
        }

        let data_blocks = (sb.s_blocks_count - sb.s_first_data_block) as u64;
        let groups_count = data_blocks.div_ceil(sb.s_blocks_per_group as u64);
        if groups_count * sb.s_inodes_per_group as u64 != sb.s_inodes_count as u64 {
            return Err(AuditError::InvalidGeometry(format!(
                "{} inodes do not fill {} groups of {}",
                sb.s_inodes_count, groups_count, sb.s_inodes_per_group
            )));
        }
        let table_end = (EXT2_BOOT_SIZE + EXT2_SUPERBLOCK_SIZE).next_multiple_of(block_size as u64)
            + groups_count * EXT2_GROUP_DESC_SIZE;
        if table_end > filesystem_size {
            return Err(AuditError::InvalidGeometry(format!(
                "descriptor table for {} groups ends at byte {}, past the image end ({} bytes)",
                groups_count, table_end, filesystem_size
            )));
        }

        let geometry = Geometry {
            block_size,
            blocks_count: sb.s_blocks_count,
            blocks_per_group: sb.s_blocks_per_group,
            inodes_per_group: sb.s_inodes_per_group,
            inodes_count: sb.s_inodes_count,
            inode_size,
            reserved_gdt_blocks: sb.s_reserved_gdt_blocks as u32,
            first_data_block: sb.s_first_data_block,
            free_blocks_count: sb.s_free_blocks_count,
            free_inodes_count: sb.s_free_inodes_count,
            filesystem_size,
            volume_name: sb.volume_name(),
        };

        info!(
            "ext2 geometry: {} blocks of {} bytes, {} groups, {} inodes per group",
            geometry.blocks_count,
            geometry.block_size,
            geometry.groups_count(),
            geometry.inodes_per_group
        );
        debug!("{:?}", geometry);
        Ok(geometry)
    }

    /// Number of block groups
    pub fn groups_count(&self) -> u32 {
        let data_blocks = self.blocks_count - self.first_data_block;
        data_blocks.div_ceil(self.blocks_per_group)
    }

    /// 1 when the boot sector occupies a whole block of its own
    pub fn boot_offset(&self) -> u32 {
        if self.block_size as u64 <= EXT2_BOOT_SIZE {
            1
        } else {
            0
        }
    }

    /// Byte offset of the group descriptor table
    pub fn descriptor_table_offset(&self) -> u64 {
        (EXT2_BOOT_SIZE + EXT2_SUPERBLOCK_SIZE).next_multiple_of(self.block_size as u64)
    }

    pub fn descriptor_offset(&self, group: u32) -> u64 {
        self.descriptor_table_offset() + group as u64 * EXT2_GROUP_DESC_SIZE
    }

    /// Blocks taken by one copy of the descriptor table, without reserved growth
    pub fn gdt_blocks(&self) -> u32 {
        (self.groups_count() as u64 * EXT2_GROUP_DESC_SIZE).div_ceil(self.block_size as u64) as u32
    }

    pub fn inode_table_blocks(&self) -> u32 {
        (self.inodes_per_group as u64 * self.inode_size as u64 / self.block_size as u64) as u32
    }

    /// First block covered by `group`'s bitmap
    pub fn group_first_block(&self, group: u32) -> u64 {
        group as u64 * self.blocks_per_group as u64 + self.boot_offset() as u64
    }

    pub fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size as u64
    }

    /// Block numbers held by one indirect block
    pub fn pointers_per_block(&self) -> usize {
        self.block_size as usize / 4
    }

    /// Length of the inode usage table
    pub fn inode_slots(&self) -> u64 {
        self.groups_count() as u64 * self.inodes_per_group as u64
    }

    /// Blocks that can be tracked: those that exist and lie inside the image
    pub fn tracked_blocks(&self) -> u64 {
        let in_image = self.filesystem_size.div_ceil(self.block_size as u64);
        (self.blocks_count as u64).min(in_image)
    }

    /// Inode slots that can be tracked: records past the image end are unreadable
    pub fn tracked_inodes(&self) -> u64 {
        self.inode_slots()
            .min(self.filesystem_size / self.inode_size as u64)
    }

    /// Group owning inode `inode` (1-based)
    pub fn inode_group(&self, inode: u32) -> u32 {
        (inode - 1) / self.inodes_per_group
    }

    pub fn inode_index(&self, inode: u32) -> u32 {
        (inode - 1) % self.inodes_per_group
    }
}
