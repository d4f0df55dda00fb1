// Synthetic ext2 images for the audit tests
//
// Layout: 1K blocks, first data block 1, 32 inodes of 128 bytes per group.
// Groups 0, 1 and powers of 3, 5 and 7 start with a superblock and one
// descriptor table block; every group then holds its block bitmap, inode
// bitmap and a 4 block inode table. Inodes and data are only allocated
// from group 0. Bitmaps and every free counter are derived from what was
// allocated, so a freshly built image audits clean.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use e2audit_core::{AuditOptions, ImageReader};
use e2audit_filesystems::Ext2Filesystem;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

pub const BLOCK_SIZE: usize = 1024;
pub const INODES_PER_GROUP: u32 = 32;
pub const INODE_SIZE: usize = 128;
pub const ROOT: u32 = 2;
pub const TABLE_BLOCKS: u32 = INODES_PER_GROUP * INODE_SIZE as u32 / BLOCK_SIZE as u32;

pub const MODE_DIR: u16 = 0x41ED;
pub const MODE_FILE: u16 = 0x81A4;
pub const MODE_SYMLINK: u16 = 0xA1FF;

pub const CTIME: u32 = 1_600_000_000;

const FIRST_INO: u32 = 11;
const SUPERBLOCK: usize = 1024;
const DESCRIPTORS: usize = 2048;

pub type MemImage = ImageReader<Cursor<Vec<u8>>>;

#[derive(Debug, Clone, Copy)]
struct GroupLayout {
    first_block: u32,
    end_block: u32,
    block_bitmap: u32,
    inode_bitmap: u32,
    inode_table: u32,
}

#[derive(Debug, Clone)]
struct Node {
    mode: u16,
    size: u32,
    blocks: Vec<u32>,
    indirect: Option<u32>,
    inline: Option<Vec<u8>>,
    entries: Vec<(String, u32)>,
}

fn is_backup_group(group: u32) -> bool {
    fn power_of(mut n: u32, base: u32) -> bool {
        while n > 1 && n % base == 0 {
            n /= base;
        }
        n == 1
    }
    group <= 1 || power_of(group, 3) || power_of(group, 5) || power_of(group, 7)
}

pub struct ImageBuilder {
    blocks_count: u32,
    blocks_per_group: u32,
    groups: Vec<GroupLayout>,
    used_blocks: BTreeSet<u32>,
    next_block: u32,
    next_inode: u32,
    nodes: BTreeMap<u32, Node>,
    data: BTreeMap<u32, Vec<u8>>,
}

impl ImageBuilder {
    /// One group of 127 blocks with an empty root directory
    pub fn new() -> Self {
        Self::with_layout(1, 8192, 128)
    }

    /// `groups` full groups of `blocks_per_group` blocks
    pub fn with_groups(groups: u32, blocks_per_group: u32) -> Self {
        Self::with_layout(groups, blocks_per_group, groups * blocks_per_group + 1)
    }

    fn with_layout(groups: u32, blocks_per_group: u32, blocks_count: u32) -> Self {
        let gdt_blocks = (groups * 32).div_ceil(BLOCK_SIZE as u32);
        let mut used_blocks = BTreeSet::new();
        let mut layouts = Vec::new();

        for g in 0..groups {
            let first_block = g * blocks_per_group + 1;
            let end_block = (first_block + blocks_per_group).min(blocks_count);
            let mut next = first_block;
            if is_backup_group(g) {
                used_blocks.extend(next..next + 1 + gdt_blocks);
                next += 1 + gdt_blocks;
            }
            used_blocks.extend(next..next + 2 + TABLE_BLOCKS);
            layouts.push(GroupLayout {
                first_block,
                end_block,
                block_bitmap: next,
                inode_bitmap: next + 1,
                inode_table: next + 2,
            });
        }

        let next_block = layouts[0].inode_table + TABLE_BLOCKS;
        let mut builder = Self {
            blocks_count,
            blocks_per_group,
            groups: layouts,
            used_blocks,
            next_block,
            next_inode: FIRST_INO,
            nodes: BTreeMap::new(),
            data: BTreeMap::new(),
        };

        let block = builder.alloc_block();
        builder.nodes.insert(
            ROOT,
            Node {
                mode: MODE_DIR,
                size: BLOCK_SIZE as u32,
                blocks: vec![block],
                indirect: None,
                inline: None,
                entries: vec![(".".into(), ROOT), ("..".into(), ROOT)],
            },
        );
        builder
    }

    fn alloc_block(&mut self) -> u32 {
        let block = self.next_block;
        assert!(block < self.groups[0].end_block, "group 0 is out of blocks");
        self.used_blocks.insert(block);
        self.next_block += 1;
        block
    }

    fn alloc_inode(&mut self) -> u32 {
        let inode = self.next_inode;
        assert!(inode <= INODES_PER_GROUP, "group 0 is out of inodes");
        self.next_inode += 1;
        inode
    }

    /// Add a directory entry without allocating anything
    pub fn link(&mut self, parent: u32, name: &str, inode: u32) -> &mut Self {
        self.nodes
            .get_mut(&parent)
            .expect("parent exists")
            .entries
            .push((name.to_string(), inode));
        self
    }

    pub fn mkdir(&mut self, parent: u32, name: &str) -> u32 {
        let inode = self.alloc_inode();
        let block = self.alloc_block();
        self.nodes.insert(
            inode,
            Node {
                mode: MODE_DIR,
                size: BLOCK_SIZE as u32,
                blocks: vec![block],
                indirect: None,
                inline: None,
                entries: vec![(".".into(), inode), ("..".into(), parent)],
            },
        );
        self.link(parent, name, inode);
        inode
    }

    /// Regular file; more than 12 blocks go through a single indirect block
    pub fn add_file(&mut self, parent: u32, name: &str, contents: &[u8]) -> u32 {
        let inode = self.alloc_inode();
        let count = contents.len().div_ceil(BLOCK_SIZE);
        assert!(count <= 12 + BLOCK_SIZE / 4, "file too large for the builder");

        let mut blocks = Vec::with_capacity(count);
        let mut indirect = None;
        for (i, chunk) in contents.chunks(BLOCK_SIZE).enumerate() {
            if i == 12 {
                indirect = Some(self.alloc_block());
            }
            let block = self.alloc_block();
            self.data.insert(block, chunk.to_vec());
            blocks.push(block);
        }

        self.nodes.insert(
            inode,
            Node {
                mode: MODE_FILE,
                size: contents.len() as u32,
                blocks,
                indirect,
                inline: None,
                entries: Vec::new(),
            },
        );
        self.link(parent, name, inode);
        inode
    }

    pub fn add_symlink(&mut self, parent: u32, name: &str, target: &str) -> u32 {
        let inode = self.alloc_inode();
        let (blocks, inline) = if target.len() < 60 {
            (Vec::new(), Some(target.as_bytes().to_vec()))
        } else {
            let block = self.alloc_block();
            self.data.insert(block, target.as_bytes().to_vec());
            (vec![block], None)
        };
        self.nodes.insert(
            inode,
            Node {
                mode: MODE_SYMLINK,
                size: target.len() as u32,
                blocks,
                indirect: None,
                inline,
                entries: Vec::new(),
            },
        );
        self.link(parent, name, inode);
        inode
    }

    pub fn build(&self) -> TestImage {
        let mut image = TestImage {
            bytes: vec![0u8; self.blocks_count as usize * BLOCK_SIZE],
            blocks_per_group: self.blocks_per_group,
            tables: self.groups.iter().map(|g| g.inode_table).collect(),
            block_bitmaps: self.groups.iter().map(|g| g.block_bitmap).collect(),
            inode_bitmaps: self.groups.iter().map(|g| g.inode_bitmap).collect(),
        };

        for (&inode, node) in &self.nodes {
            self.write_inode(&mut image, inode, node);
            if node.mode == MODE_DIR {
                let block = write_entries(&node.entries);
                image.block_mut(node.blocks[0]).copy_from_slice(&block);
            }
            if let Some(indirect) = node.indirect {
                let mut pointers = image.block_mut(indirect);
                for &block in &node.blocks[12..] {
                    pointers.write_u32::<LittleEndian>(block).unwrap();
                }
            }
        }
        for (&block, contents) in &self.data {
            image.block_mut(block)[..contents.len()].copy_from_slice(contents);
        }

        let mut free_blocks_total = 0u32;
        let mut free_inodes_total = 0u32;
        for (g, layout) in self.groups.iter().enumerate() {
            let mut free_blocks = 0u32;
            for block in layout.first_block..layout.end_block {
                if self.used_blocks.contains(&block) {
                    set_bit(image.block_mut(layout.block_bitmap), block - layout.first_block);
                } else {
                    free_blocks += 1;
                }
            }

            let mut free_inodes = 0u32;
            let mut used_dirs = 0u16;
            for i in 0..INODES_PER_GROUP {
                let inode = g as u32 * INODES_PER_GROUP + i + 1;
                let node = self.nodes.get(&inode);
                if node.is_some_and(|n| n.mode == MODE_DIR) {
                    used_dirs += 1;
                }
                if inode < FIRST_INO || node.is_some() {
                    set_bit(image.block_mut(layout.inode_bitmap), i);
                } else {
                    free_inodes += 1;
                }
            }

            let offset = DESCRIPTORS + g * 32;
            let mut desc = &mut image.bytes[offset..offset + 32];
            desc.write_u32::<LittleEndian>(layout.block_bitmap).unwrap();
            desc.write_u32::<LittleEndian>(layout.inode_bitmap).unwrap();
            desc.write_u32::<LittleEndian>(layout.inode_table).unwrap();
            desc.write_u16::<LittleEndian>(free_blocks as u16).unwrap();
            desc.write_u16::<LittleEndian>(free_inodes as u16).unwrap();
            desc.write_u16::<LittleEndian>(used_dirs).unwrap();

            free_blocks_total += free_blocks;
            free_inodes_total += free_inodes;
        }

        self.write_superblock(&mut image, free_blocks_total, free_inodes_total);
        image
    }

    fn write_inode(&self, image: &mut TestImage, inode: u32, node: &Node) {
        let offset = image.inode_offset(inode);
        let sectors = (node.blocks.len() + node.indirect.iter().count()) as u32 * 2;
        let links = if node.mode == MODE_DIR { 2 } else { 1 };

        let mut rec = &mut image.bytes[offset..offset + INODE_SIZE];
        rec.write_u16::<LittleEndian>(node.mode).unwrap();
        rec.write_u16::<LittleEndian>(0).unwrap(); // uid
        rec.write_u32::<LittleEndian>(node.size).unwrap();
        rec.write_u32::<LittleEndian>(CTIME).unwrap(); // atime
        rec.write_u32::<LittleEndian>(CTIME).unwrap(); // ctime
        rec.write_u32::<LittleEndian>(CTIME + 60).unwrap(); // mtime
        rec.write_u32::<LittleEndian>(0).unwrap(); // dtime
        rec.write_u16::<LittleEndian>(0).unwrap(); // gid
        rec.write_u16::<LittleEndian>(links).unwrap();
        rec.write_u32::<LittleEndian>(sectors).unwrap();
        rec.write_u32::<LittleEndian>(0).unwrap(); // flags
        rec.write_u32::<LittleEndian>(0).unwrap(); // osd1

        match &node.inline {
            Some(target) => rec[..target.len()].copy_from_slice(target),
            None => {
                for slot in 0..12 {
                    let block = node.blocks.get(slot).copied().unwrap_or(0);
                    rec.write_u32::<LittleEndian>(block).unwrap();
                }
                rec.write_u32::<LittleEndian>(node.indirect.unwrap_or(0)).unwrap();
            }
        }
    }

    fn write_superblock(&self, image: &mut TestImage, free_blocks: u32, free_inodes: u32) {
        let inodes_count = self.groups.len() as u32 * INODES_PER_GROUP;
        let sb = &mut image.bytes[SUPERBLOCK..SUPERBLOCK + 1024];

        let mut head = &mut sb[..];
        head.write_u32::<LittleEndian>(inodes_count).unwrap();
        head.write_u32::<LittleEndian>(self.blocks_count).unwrap();
        head.write_u32::<LittleEndian>(0).unwrap(); // reserved blocks
        head.write_u32::<LittleEndian>(free_blocks).unwrap();
        head.write_u32::<LittleEndian>(free_inodes).unwrap();
        head.write_u32::<LittleEndian>(1).unwrap(); // first data block
        head.write_u32::<LittleEndian>(0).unwrap(); // log block size
        head.write_u32::<LittleEndian>(0).unwrap(); // log fragment size
        head.write_u32::<LittleEndian>(self.blocks_per_group).unwrap();
        head.write_u32::<LittleEndian>(self.blocks_per_group).unwrap();
        head.write_u32::<LittleEndian>(INODES_PER_GROUP).unwrap();

        (&mut sb[0x38..]).write_u16::<LittleEndian>(0xEF53).unwrap();
        (&mut sb[0x3A..]).write_u16::<LittleEndian>(1).unwrap(); // clean
        (&mut sb[0x4C..]).write_u32::<LittleEndian>(1).unwrap(); // dynamic revision
        (&mut sb[0x54..]).write_u32::<LittleEndian>(FIRST_INO).unwrap();
        (&mut sb[0x58..]).write_u16::<LittleEndian>(INODE_SIZE as u16).unwrap();
        sb[0x78..0x78 + 9].copy_from_slice(b"synthetic");
    }
}

fn set_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[bit as usize / 8] |= 1 << (bit % 8);
}

/// One directory block; the last record runs to the end of the block
fn write_entries(entries: &[(String, u32)]) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut offset = 0usize;
    for (i, (name, inode)) in entries.iter().enumerate() {
        let mut rec_len = (8 + name.len() + 3) & !3;
        if i == entries.len() - 1 {
            rec_len = BLOCK_SIZE - offset;
        }
        assert!(offset + rec_len <= BLOCK_SIZE, "directory block overflow");

        let mut rec = &mut block[offset..offset + 8];
        rec.write_u32::<LittleEndian>(*inode).unwrap();
        rec.write_u16::<LittleEndian>(rec_len as u16).unwrap();
        rec.write_u8(name.len() as u8).unwrap();
        rec.write_u8(0).unwrap();
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name.as_bytes());
        offset += rec_len;
    }
    block
}

/// A built image plus enough layout knowledge to corrupt it precisely
pub struct TestImage {
    pub bytes: Vec<u8>,
    blocks_per_group: u32,
    tables: Vec<u32>,
    block_bitmaps: Vec<u32>,
    inode_bitmaps: Vec<u32>,
}

impl TestImage {
    pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
        let start = block as usize * BLOCK_SIZE;
        &mut self.bytes[start..start + BLOCK_SIZE]
    }

    pub fn inode_offset(&self, inode: u32) -> usize {
        let group = ((inode - 1) / INODES_PER_GROUP) as usize;
        let index = ((inode - 1) % INODES_PER_GROUP) as usize;
        self.tables[group] as usize * BLOCK_SIZE + index * INODE_SIZE
    }

    /// Block pointer `slot` (0..15) of `inode`
    pub fn pointer(&self, inode: u32, slot: usize) -> u32 {
        let at = self.inode_offset(inode) + 40 + slot * 4;
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    pub fn set_pointer(&mut self, inode: u32, slot: usize, block: u32) {
        let at = self.inode_offset(inode) + 40 + slot * 4;
        self.bytes[at..at + 4].copy_from_slice(&block.to_le_bytes());
    }

    pub fn set_mode(&mut self, inode: u32, mode: u16) {
        let at = self.inode_offset(inode);
        self.bytes[at..at + 2].copy_from_slice(&mode.to_le_bytes());
    }

    /// Invert the block bitmap bit of `block`
    pub fn flip_block_bit(&mut self, block: u32) {
        let group = ((block - 1) / self.blocks_per_group) as usize;
        let bit = (block - 1) % self.blocks_per_group;
        let bitmap = self.block_bitmaps[group];
        self.block_mut(bitmap)[bit as usize / 8] ^= 1 << (bit % 8);
    }

    pub fn flip_inode_bit(&mut self, inode: u32) {
        let group = ((inode - 1) / INODES_PER_GROUP) as usize;
        let bit = (inode - 1) % INODES_PER_GROUP;
        let bitmap = self.inode_bitmaps[group];
        self.block_mut(bitmap)[bit as usize / 8] ^= 1 << (bit % 8);
    }

    pub fn descriptor_u16(&self, group: u32, field: usize) -> u16 {
        let at = DESCRIPTORS + group as usize * 32 + field;
        u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    pub fn set_descriptor_u16(&mut self, group: u32, field: usize, value: u16) {
        let at = DESCRIPTORS + group as usize * 32 + field;
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_descriptor_u32(&mut self, group: u32, field: usize, value: u32) {
        let at = DESCRIPTORS + group as usize * 32 + field;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn superblock_u32(&self, field: usize) -> u32 {
        let at = SUPERBLOCK + field;
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    pub fn set_superblock_u32(&mut self, field: usize, value: u32) {
        let at = SUPERBLOCK + field;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Shift a group's free block count and the superblock total together
    pub fn adjust_free_blocks(&mut self, group: u32, delta: i32) {
        let free = self.descriptor_u16(group, 12) as i32 + delta;
        self.set_descriptor_u16(group, 12, free as u16);
        let total = self.superblock_u32(12) as i32 + delta;
        self.set_superblock_u32(12, total as u32);
    }

    pub fn adjust_free_inodes(&mut self, group: u32, delta: i32) {
        let free = self.descriptor_u16(group, 14) as i32 + delta;
        self.set_descriptor_u16(group, 14, free as u16);
        let total = self.superblock_u32(16) as i32 + delta;
        self.set_superblock_u32(16, total as u32);
    }

    pub fn medium(self) -> MemImage {
        ImageReader::from_bytes(self.bytes)
    }

    pub fn audit(self) -> Ext2Filesystem<MemImage> {
        self.audit_with(AuditOptions::default())
    }

    pub fn audit_with(self, options: AuditOptions) -> Ext2Filesystem<MemImage> {
        Ext2Filesystem::audit(self.medium(), options).expect("image audits")
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
