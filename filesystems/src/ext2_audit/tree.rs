// Presentation pass: a listing of the discovered directory tree

use chrono::{DateTime, Utc};
use e2audit_core::ByteMedium;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::inode::{FileType, Inode};
use super::superblock::Geometry;

/// One line of the listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub depth: usize,
    pub name: String,
    pub inode: u32,
    pub file_type: FileType,
    pub size: u32,
    /// Seconds since the Unix epoch
    pub ctime: u32,
    pub mtime: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

/// Pre-order listing of the directory tree, root first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTree {
    pub entries: Vec<TreeEntry>,
}

impl FileTree {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

/// Build the listing from an already walked inode map.
///
/// Uses its own visited set, separate from the walk. Names starting with
/// `hidden_marker` are left out along with everything below them, as are
/// entries pointing at inodes that were never discovered.
pub fn render<M: ByteMedium + ?Sized>(
    inodes: &BTreeMap<u32, Inode>,
    root: u32,
    hidden_marker: char,
    geometry: &Geometry,
    medium: &mut M,
) -> FileTree {
    let mut tree = FileTree::default();
    let root_inode = match inodes.get(&root) {
        Some(inode) => inode,
        None => return tree,
    };

    let mut visited = HashSet::from([root]);
    tree.entries.push(entry(root_inode, "/".to_string(), 0, geometry, medium));

    // (directory, depth of its children, index of the next child)
    let mut stack: Vec<(&Inode, usize, usize)> = vec![(root_inode, 1, 0)];
    while let Some(frame) = stack.last_mut() {
        let (directory, depth, next) = *frame;
        frame.2 += 1;
        let child = match directory.children.get(next) {
            Some(child) => child,
            None => {
                stack.pop();
                continue;
            }
        };

        if child.name.starts_with(hidden_marker) || visited.contains(&child.inode) {
            continue;
        }
        let Some(inode) = inodes.get(&child.inode) else {
            continue;
        };
        visited.insert(child.inode);

        tree.entries
            .push(entry(inode, child.name.clone(), depth, geometry, medium));
        if inode.is_directory() {
            stack.push((inode, depth + 1, 0));
        }
    }

    tree
}

fn entry<M: ByteMedium + ?Sized>(
    inode: &Inode,
    name: String,
    depth: usize,
    geometry: &Geometry,
    medium: &mut M,
) -> TreeEntry {
    TreeEntry {
        depth,
        name,
        inode: inode.number,
        file_type: inode.file_type,
        size: inode.size(),
        ctime: inode.raw.i_ctime,
        mtime: inode.raw.i_mtime,
        link_target: inode.read_symbolic_link(geometry, medium),
    }
}

fn timestamp(secs: u32) -> String {
    match DateTime::<Utc>::from_timestamp(secs as i64, 0) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => secs.to_string(),
    }
}

impl fmt::Display for TreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} ({}, {} bytes, created {}, modified {})",
            "  ".repeat(self.depth),
            self.name,
            self.file_type,
            self.size,
            timestamp(self.ctime),
            timestamp(self.mtime)
        )?;
        if let Some(target) = &self.link_target {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}

impl fmt::Display for FileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
