// Directory entry decoding (linked ext2_dir_entry_2 records)

use byteorder::{LittleEndian, ReadBytesExt};
use e2audit_core::ByteMedium;
use log::{debug, trace};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Cursor;

use super::constants::*;
use super::superblock::Geometry;

/// Entry in a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    /// Type tag stored in the entry itself; the inode's mode is authoritative
    pub file_type: u8,
}

/// Fixed 8-byte header in front of every entry name
#[derive(Debug, Clone, Copy)]
struct EntryHeader {
    inode: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
}

impl EntryHeader {
    fn parse(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            inode: cursor.read_u32::<LittleEndian>()?,
            rec_len: cursor.read_u16::<LittleEndian>()?,
            name_len: cursor.read_u8()?,
            file_type: cursor.read_u8()?,
        })
    }
}

/// Decode the entries stored in a directory's resolved `blocks`.
///
/// Entries with an empty name or inode number 0 are stepped over but not
/// returned. Holes, out-of-range blocks and repeats of an already decoded
/// block are skipped; a malformed record abandons the rest of its block. Returns the entries and local errors.
pub fn read_entries<M: ByteMedium + ?Sized>(
    blocks: &[u32],
    geometry: &Geometry,
    medium: &mut M,
) -> (Vec<DirEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    let block_size = geometry.block_size as usize;
    let mut decoded = HashSet::new();

    for &block in blocks {
        if block == 0 || block >= geometry.blocks_count {
            continue;
        }
        if !decoded.insert(block) {
            debug!("Directory block {} already decoded", block);
            continue;
        }
        let data = match medium.read_at(geometry.block_offset(block), block_size) {
            Ok(data) => data,
            Err(e) => {
                errors.push(format!("Directory block {} cannot be read: {}", block, e));
                continue;
            }
        };

        let mut offset = 0usize;
        while offset + EXT2_DIR_ENTRY_HEADER_SIZE <= block_size {
            let header = match EntryHeader::parse(&data[offset..offset + EXT2_DIR_ENTRY_HEADER_SIZE]) {
                Ok(header) => header,
                Err(_) => break,
            };
            let rec_len = header.rec_len as usize;
            let name_end = offset + EXT2_DIR_ENTRY_HEADER_SIZE + header.name_len as usize;

            if rec_len < EXT2_DIR_ENTRY_HEADER_SIZE || name_end > block_size {
                errors.push(format!(
                    "Malformed directory entry in block {} at offset {} (record length {})",
                    block, offset, rec_len
                ));
                break;
            }

            if header.name_len > 0 && header.inode != 0 {
                let name = String::from_utf8_lossy(
                    &data[offset + EXT2_DIR_ENTRY_HEADER_SIZE..name_end],
                )
                .into_owned();
                trace!("Entry {:?} -> inode {}", name, header.inode);
                entries.push(DirEntry {
                    name,
                    inode: header.inode,
                    file_type: header.file_type,
                });
            }

            offset += rec_len;
        }
    }

    (entries, errors)
}
