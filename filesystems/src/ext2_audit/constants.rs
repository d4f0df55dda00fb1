// ext2 on-disk constants used by the auditor

use static_assertions::const_assert_eq;

// Magic numbers
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

// Fixed layout
pub const EXT2_BOOT_SIZE: u64 = 1024;
pub const EXT2_SUPERBLOCK_SIZE: u64 = 1024;
pub const EXT2_GROUP_DESC_SIZE: u64 = 32;
pub const EXT2_MIN_BLOCK_SIZE: u32 = 1024;
pub const EXT2_MAX_LOG_BLOCK_SIZE: u32 = 6; // 64KiB
pub const EXT2_GOOD_OLD_REV: u32 = 0;
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;

// Inode layout
pub const EXT2_INODE_RECORD_SIZE: usize = 128;
pub const EXT2_N_BLOCKS: usize = 15;
pub const EXT2_NDIR_BLOCKS: usize = 12;
pub const EXT2_IND_BLOCK: usize = 12;
pub const EXT2_DIND_BLOCK: usize = 13;
pub const EXT2_TIND_BLOCK: usize = 14;
pub const EXT2_FAST_SYMLINK_MAX: u64 = 60;

const_assert_eq!(EXT2_TIND_BLOCK + 1, EXT2_N_BLOCKS);
const_assert_eq!(EXT2_FAST_SYMLINK_MAX, (EXT2_N_BLOCKS * 4) as u64);
const_assert_eq!(EXT2_INODE_RECORD_SIZE, EXT2_GOOD_OLD_INODE_SIZE as usize);

// Special inode numbers
pub const EXT2_ROOT_INO: u32 = 2;
pub const EXT2_RESERVED_INODES: u32 = 10;

// Directory entries
pub const EXT2_DIR_ENTRY_HEADER_SIZE: usize = 8;

// File mode type nibble (i_mode >> 12)
pub const EXT2_S_IFIFO: u16 = 0x1;
pub const EXT2_S_IFCHR: u16 = 0x2;
pub const EXT2_S_IFDIR: u16 = 0x4;
pub const EXT2_S_IFBLK: u16 = 0x6;
pub const EXT2_S_IFREG: u16 = 0x8;
pub const EXT2_S_IFLNK: u16 = 0xA;
pub const EXT2_S_IFSOCK: u16 = 0xC;

// Backup superblock bases for the sparse_super layout
pub const EXT2_SPARSE_SUPER_BASES: [u32; 3] = [3, 5, 7];
