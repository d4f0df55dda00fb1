// Directory tree walk: discovers inodes from the root and marks their usage

use e2audit_core::{AuditOptions, ByteMedium};
use log::{debug, warn};
use std::collections::BTreeMap;

use super::block_group::BlockGroup;
use super::constants::*;
use super::inode::{Inode, InodeLookupError};
use super::superblock::Geometry;
use super::usage::UsageTracker;

/// Result of a walk: the inode map and filesystem-scope errors
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub inodes: BTreeMap<u32, Inode>,
    pub errors: Vec<String>,
}

/// Pre-order depth-first walk from the root inode.
///
/// The inode map is the visited set: an entry whose inode is already known
/// is never followed again, which covers ".", "..", hard links and directory
/// cycles. Frames live on an explicit stack, so hostile directory graphs
/// cannot exhaust the call stack.
pub struct TreeWalker<'a, M: ByteMedium + ?Sized> {
    medium: &'a mut M,
    geometry: &'a Geometry,
    groups: &'a [BlockGroup],
    options: &'a AuditOptions,
    tracker: &'a mut UsageTracker,
    outcome: WalkOutcome,
}

impl<'a, M: ByteMedium + ?Sized> TreeWalker<'a, M> {
    pub fn new(
        medium: &'a mut M,
        geometry: &'a Geometry,
        groups: &'a [BlockGroup],
        options: &'a AuditOptions,
        tracker: &'a mut UsageTracker,
    ) -> Self {
        Self {
            medium,
            geometry,
            groups,
            options,
            tracker,
            outcome: WalkOutcome::default(),
        }
    }

    pub fn run(mut self) -> WalkOutcome {
        let root = match self.lookup(EXT2_ROOT_INO) {
            Ok(root) => root,
            Err(e) => {
                self.add_error(format!("Root inode cannot be read: {}", e));
                return self.outcome;
            }
        };
        if !root.is_directory() {
            self.add_error(format!("Root inode is a {}, not a directory", root.file_type));
        }
        self.mark_blocks(&root);
        self.outcome.inodes.insert(EXT2_ROOT_INO, root);

        // (directory inode, index of the next child to visit)
        let mut stack: Vec<(u32, usize)> = Vec::new();
        if self.open_directory(EXT2_ROOT_INO) {
            stack.push((EXT2_ROOT_INO, 0));
        }

        loop {
            let (directory, next) = match stack.last_mut() {
                Some(frame) => {
                    let current = *frame;
                    frame.1 += 1;
                    current
                }
                None => break,
            };
            let child = match self
                .outcome
                .inodes
                .get(&directory)
                .and_then(|dir| dir.children.get(next))
            {
                Some(entry) => entry.inode,
                None => {
                    stack.pop();
                    continue;
                }
            };

            // Every reference counts as use, including "." and ".." of the root
            if self.tracker.has_inode_slot(child) {
                self.tracker.mark_inode(child);
            }
            if self.outcome.inodes.contains_key(&child) {
                continue;
            }

            match self.lookup(child) {
                Ok(inode) => {
                    self.mark_blocks(&inode);
                    self.outcome.inodes.insert(child, inode);
                    if self.open_directory(child) {
                        stack.push((child, 0));
                    }
                }
                Err(e) => {
                    debug!("Directory {}: {}", directory, e);
                    if let Some(dir) = self.outcome.inodes.get_mut(&directory) {
                        let msg = format!("Referencing invalid inode {}", child);
                        warn!("Inode {}: {}", directory, msg);
                        dir.errors.push(msg);
                    }
                }
            }
        }

        self.outcome
    }

    fn add_error(&mut self, msg: String) {
        warn!("Filesystem: {}", msg);
        self.outcome.errors.push(msg);
    }

    /// Find and parse inode `number` through its owning group
    fn lookup(&mut self, number: u32) -> Result<Inode, InodeLookupError> {
        if number == 0 {
            return Err(InodeLookupError::Zero);
        }
        let group_index = self.geometry.inode_group(number);
        let group = self
            .groups
            .get(group_index as usize)
            .ok_or(InodeLookupError::GroupOutOfRange {
                inode: number,
                group: group_index,
            })?;

        let record = group.read_inode(self.geometry, number, &mut *self.medium)?;
        Inode::parse(number, &record, self.geometry, &mut *self.medium, self.options).map_err(|e| {
            InodeLookupError::Unreadable {
                inode: number,
                reason: e.to_string(),
            }
        })
    }

    /// Read the entries of `number` if it is a healthy directory
    fn open_directory(&mut self, number: u32) -> bool {
        let inode = match self.outcome.inodes.get_mut(&number) {
            Some(inode) => inode,
            None => return false,
        };
        if !inode.errors.is_empty() || !inode.is_directory() {
            return false;
        }
        inode.read_directory_entries(self.geometry, &mut *self.medium);
        true
    }

    /// Mark a discovered inode's data and pointer blocks
    fn mark_blocks(&mut self, inode: &Inode) {
        for &block in inode.blocks.iter().chain(inode.indirect_blocks.iter()) {
            self.tracker.mark_block(block);
        }
        if inode.is_directory() {
            self.tracker.note_directory(inode.number);
        }
    }
}
