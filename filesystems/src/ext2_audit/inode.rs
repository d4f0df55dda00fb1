// Inode records: parsing, block map resolution and type classification

use byteorder::{LittleEndian, ReadBytesExt};
use e2audit_core::{AuditError, AuditOptions, ByteMedium};
use log::{trace, warn};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;
use super::directory::{self, DirEntry};
use super::superblock::Geometry;

/// Why a directory entry's inode number could not be turned into an inode
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InodeLookupError {
    #[error("inode number 0 is never allocated")]
    Zero,

    #[error("inode {inode} belongs to nonexistent group {group}")]
    GroupOutOfRange { inode: u32, group: u32 },

    #[error("inode {inode} belongs to broken group {group}")]
    BrokenGroup { inode: u32, group: u32 },

    #[error("inode {inode} cannot be read: {reason}")]
    Unreadable { inode: u32, reason: String },
}

/// File type from the top nibble of `i_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileType {
    Unknown,
    Fifo,
    CharDevice,
    Directory,
    BlockDevice,
    Regular,
    Symlink,
    Socket,
}

impl FileType {
    pub fn from_mode(mode: u16) -> Self {
        match mode >> 12 {
            EXT2_S_IFIFO => FileType::Fifo,
            EXT2_S_IFCHR => FileType::CharDevice,
            EXT2_S_IFDIR => FileType::Directory,
            EXT2_S_IFBLK => FileType::BlockDevice,
            EXT2_S_IFREG => FileType::Regular,
            EXT2_S_IFLNK => FileType::Symlink,
            EXT2_S_IFSOCK => FileType::Socket,
            _ => FileType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileType::Unknown => "unknown",
            FileType::Fifo => "fifo",
            FileType::CharDevice => "character device",
            FileType::Directory => "directory",
            FileType::BlockDevice => "block device",
            FileType::Regular => "regular",
            FileType::Symlink => "symlink",
            FileType::Socket => "socket",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The first 128 bytes of an on-disk inode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInode {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub i_block: [u32; EXT2_N_BLOCKS],
}

impl RawInode {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuditError> {
        let mut cursor = Cursor::new(bytes);
        let mut raw = RawInode {
            i_mode: cursor.read_u16::<LittleEndian>()?,
            i_uid: cursor.read_u16::<LittleEndian>()?,
            i_size: cursor.read_u32::<LittleEndian>()?,
            i_atime: cursor.read_u32::<LittleEndian>()?,
            i_ctime: cursor.read_u32::<LittleEndian>()?,
            i_mtime: cursor.read_u32::<LittleEndian>()?,
            i_dtime: cursor.read_u32::<LittleEndian>()?,
            i_gid: cursor.read_u16::<LittleEndian>()?,
            i_links_count: cursor.read_u16::<LittleEndian>()?,
            i_blocks: cursor.read_u32::<LittleEndian>()?,
            i_flags: cursor.read_u32::<LittleEndian>()?,
            ..Default::default()
        };

        cursor.set_position(40); // skip osd1
        for slot in raw.i_block.iter_mut() {
            *slot = cursor.read_u32::<LittleEndian>()?;
        }
        Ok(raw)
    }

    /// Symlink targets this short live in the pointer array itself
    pub fn is_fast_symlink(&self) -> bool {
        FileType::from_mode(self.i_mode) == FileType::Symlink
            && (self.i_size as u64) < EXT2_FAST_SYMLINK_MAX
            && self.i_blocks == 0
    }

    fn pointer_area_bytes(&self) -> Vec<u8> {
        self.i_block.iter().flat_map(|p| p.to_le_bytes()).collect()
    }
}

/// Blocks reached from an inode's pointer array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBlocks {
    /// Data blocks in file order; 0 marks a hole
    pub data: Vec<u32>,
    /// Indirect pointer blocks that were read
    pub indirect: Vec<u32>,
    pub errors: Vec<String>,
}

/// Collect the first ceil(i_size / block_size) data blocks of `raw`.
///
/// Direct pointers come first, then the single, double and triple indirect
/// trees. Each tree is expanded one level at a time and only as many pointer
/// slots are read as the remaining block count needs. Faults are recorded in
/// `errors` and never stop resolution.
pub fn resolve_blocks<M: ByteMedium + ?Sized>(
    raw: &RawInode,
    geometry: &Geometry,
    medium: &mut M,
    strict_indirect: bool,
) -> ResolvedBlocks {
    let mut resolved = ResolvedBlocks::default();
    if raw.is_fast_symlink() {
        return resolved;
    }

    let required = (raw.i_size as u64).div_ceil(geometry.block_size as u64) as usize;
    resolved
        .data
        .extend(raw.i_block[..EXT2_NDIR_BLOCKS].iter().take(required));

    let per_block = geometry.pointers_per_block();
    let trees = [EXT2_IND_BLOCK, EXT2_DIND_BLOCK, EXT2_TIND_BLOCK];
    for (level, slot) in (1..=3u32).zip(trees) {
        let remaining = required - resolved.data.len();
        if remaining == 0 {
            break;
        }
        let wanted = remaining.min(per_block.saturating_pow(level));
        let root = raw.i_block[slot];

        let mut frontier = vec![root];
        for depth in 1..=level {
            let covered = per_block.saturating_pow(level - depth);
            let needed = wanted.div_ceil(covered);
            let mut next = Vec::with_capacity(needed);
            for &block in &frontier {
                if next.len() >= needed {
                    break;
                }
                let take = (needed - next.len()).min(per_block);
                next.extend(read_pointer_block(
                    block,
                    take,
                    geometry,
                    medium,
                    strict_indirect,
                    &mut resolved,
                ));
            }
            frontier = next;
        }
        resolved.data.extend(frontier);
    }

    for &block in &resolved.data {
        if block >= geometry.blocks_count {
            resolved
                .errors
                .push(format!("File referencing invalid block {}", block));
        }
    }
    resolved
}

fn read_pointer_block<M: ByteMedium + ?Sized>(
    block: u32,
    take: usize,
    geometry: &Geometry,
    medium: &mut M,
    strict_indirect: bool,
    resolved: &mut ResolvedBlocks,
) -> Vec<u32> {
    if block == 0 {
        return vec![0; take];
    }
    if strict_indirect && block >= geometry.blocks_count {
        resolved
            .errors
            .push(format!("File referencing invalid indirect block {}", block));
        return vec![0; take];
    }

    trace!("Reading {} pointers from indirect block {}", take, block);
    let bytes = match medium.read_at(geometry.block_offset(block), take * 4) {
        Ok(bytes) => bytes,
        Err(e) => {
            resolved
                .errors
                .push(format!("Indirect block {} cannot be read: {}", block, e));
            return vec![0; take];
        }
    };
    if block < geometry.blocks_count {
        resolved.indirect.push(block);
    }

    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A discovered inode with its resolved blocks and local errors
#[derive(Debug, Clone)]
pub struct Inode {
    pub number: u32,
    pub raw: RawInode,
    pub blocks: Vec<u32>,
    pub indirect_blocks: Vec<u32>,
    pub file_type: FileType,
    pub children: Vec<DirEntry>,
    pub errors: Vec<String>,
}

impl Inode {
    /// Decode inode `number` from its record and resolve its blocks
    pub fn parse<M: ByteMedium + ?Sized>(
        number: u32,
        record: &[u8],
        geometry: &Geometry,
        medium: &mut M,
        options: &AuditOptions,
    ) -> Result<Self, AuditError> {
        let raw = RawInode::parse(record)?;
        let resolved = resolve_blocks(&raw, geometry, medium, options.strict_indirect_pointers);
        for error in &resolved.errors {
            warn!("Inode {}: {}", number, error);
        }

        Ok(Self {
            number,
            raw,
            blocks: resolved.data,
            indirect_blocks: resolved.indirect,
            file_type: FileType::from_mode(raw.i_mode),
            children: Vec::new(),
            errors: resolved.errors,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn size(&self) -> u32 {
        self.raw.i_size
    }

    /// Decode this directory's entries into `children`
    pub fn read_directory_entries<M: ByteMedium + ?Sized>(
        &mut self,
        geometry: &Geometry,
        medium: &mut M,
    ) {
        if !self.is_directory() {
            return;
        }
        let (children, errors) = directory::read_entries(&self.blocks, geometry, medium);
        for error in &errors {
            warn!("Inode {}: {}", self.number, error);
        }
        self.children = children;
        self.errors.extend(errors);
    }

    /// Target of a symbolic link.
    ///
    /// Short targets are stored inline in the pointer array, longer ones in
    /// the first data block. `None` for other file types or unreadable targets.
    pub fn read_symbolic_link<M: ByteMedium + ?Sized>(
        &self,
        geometry: &Geometry,
        medium: &mut M,
    ) -> Option<String> {
        if self.file_type != FileType::Symlink {
            return None;
        }
        let size = self.raw.i_size as usize;

        let bytes = if self.raw.is_fast_symlink() {
            let mut inline = self.raw.pointer_area_bytes();
            inline.truncate(size);
            inline
        } else {
            let block = *self.blocks.first()?;
            if block == 0 || block >= geometry.blocks_count {
                return None;
            }
            let len = size.min(geometry.block_size as usize);
            medium.read_at(geometry.block_offset(block), len).ok()?
        };

        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}
