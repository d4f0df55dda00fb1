// Scoped error report: filesystem, block group and inode errors

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::block_group::BlockGroup;
use super::inode::Inode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub filesystem: Vec<String>,
    /// Keyed by block group index; groups without errors are absent
    pub groups: BTreeMap<u32, Vec<String>>,
    /// Keyed by inode number; inodes without errors are absent
    pub inodes: BTreeMap<u32, Vec<String>>,
    pub total: usize,
}

impl AuditReport {
    pub fn collect(
        filesystem: &[String],
        groups: &[BlockGroup],
        inodes: &BTreeMap<u32, Inode>,
    ) -> Self {
        let groups: BTreeMap<u32, Vec<String>> = groups
            .iter()
            .filter(|g| !g.errors.is_empty())
            .map(|g| (g.index, g.errors.clone()))
            .collect();
        let inodes: BTreeMap<u32, Vec<String>> = inodes
            .values()
            .filter(|i| !i.errors.is_empty())
            .map(|i| (i.number, i.errors.clone()))
            .collect();

        let total = filesystem.len()
            + groups.values().map(Vec::len).sum::<usize>()
            + inodes.values().map(Vec::len).sum::<usize>();

        Self {
            filesystem: filesystem.to_vec(),
            groups,
            inodes,
            total,
        }
    }

    /// Zero errors: the image is consistent as far as this audit can tell
    pub fn is_clean(&self) -> bool {
        self.total == 0
    }

    pub fn group_errors(&self, group: u32) -> &[String] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn inode_errors(&self, inode: u32) -> &[String] {
        self.inodes.get(&inode).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERRORS:")?;
        for error in &self.filesystem {
            writeln!(f, "[Filesystem error] {}", error)?;
        }
        for (group, errors) in &self.groups {
            for error in errors {
                writeln!(f, "[Block Group {} error] {}", group, error)?;
            }
        }
        for (inode, errors) in &self.inodes {
            for error in errors {
                writeln!(f, "[Inode {} error] {}", inode, error)?;
            }
        }
        write!(f, "Total number of errors = {}", self.total)
    }
}
