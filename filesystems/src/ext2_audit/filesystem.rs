// Whole-image audit: group construction, tree walk, then reconciliation
//
// The phases run strictly in order. Reconciliation only ever sees a frozen
// usage table, so nothing is compared before the walk has finished.

use e2audit_core::{AuditError, AuditOptions, ByteMedium, ImageReader};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use super::block_group::BlockGroup;
use super::constants::*;
use super::inode::Inode;
use super::report::AuditReport;
use super::superblock::Geometry;
use super::tree::{self, FileTree};
use super::usage::{FrozenUsage, UsageTracker};
use super::walker::{TreeWalker, WalkOutcome};

/// An audited ext2 image
pub struct Ext2Filesystem<M: ByteMedium> {
    medium: M,
    options: AuditOptions,
    pub geometry: Geometry,
    pub groups: Vec<BlockGroup>,
    /// Every inode reached from the root, keyed by number
    pub inodes: BTreeMap<u32, Inode>,
    /// Filesystem-scope errors
    pub errors: Vec<String>,
    usage: FrozenUsage,
}

impl Ext2Filesystem<ImageReader<File>> {
    /// Audit the image at `path`
    pub fn open<P: AsRef<Path>>(path: P, options: AuditOptions) -> Result<Self, AuditError> {
        Self::audit(ImageReader::open(path)?, options)
    }
}

impl<M: ByteMedium> Ext2Filesystem<M> {
    /// Run every audit phase over `medium`.
    ///
    /// Only a truncated superblock, a wrong magic number or unusable geometry
    /// fail here; everything else ends up in [`Ext2Filesystem::report`].
    pub fn audit(mut medium: M, options: AuditOptions) -> Result<Self, AuditError> {
        let geometry = Geometry::read(&mut medium)?;
        let mut tracker = UsageTracker::new(&geometry);

        info!("Reading {} group descriptors", geometry.groups_count());
        let mut groups: Vec<BlockGroup> = (0..geometry.groups_count())
            .map(|index| BlockGroup::construct(&geometry, index, &mut tracker, &mut medium))
            .collect();

        let readable = groups.first().is_some_and(|g| !g.is_broken());
        let outcome = if readable {
            info!("Walking the directory tree");
            TreeWalker::new(&mut medium, &geometry, &groups, &options, &mut tracker).run()
        } else {
            WalkOutcome {
                errors: vec!["The filesystem cannot be read: block group 0 is unusable".to_string()],
                ..Default::default()
            }
        };

        let usage = tracker.freeze();
        if readable {
            info!("Reconciling {} block groups", groups.len());
            for group in groups.iter_mut() {
                group.reconcile(&geometry, &usage, &mut medium);
            }
        }

        let mut fs = Self {
            medium,
            options,
            geometry,
            groups,
            inodes: outcome.inodes,
            errors: outcome.errors,
            usage,
        };
        if readable && fs.options.verify_summary_counts {
            fs.verify_summary_counts();
        }

        info!(
            "Audit finished: {} inodes reached, {} blocks and {} inodes in use, {} errors",
            fs.inodes.len(),
            fs.usage.used_blocks(),
            fs.usage.used_inodes(),
            fs.report().total
        );
        Ok(fs)
    }

    fn add_error(&mut self, msg: String) {
        warn!("Filesystem: {}", msg);
        self.errors.push(msg);
    }

    pub fn report(&self) -> AuditReport {
        AuditReport::collect(&self.errors, &self.groups, &self.inodes)
    }

    pub fn root(&self) -> Option<&Inode> {
        self.inodes.get(&EXT2_ROOT_INO)
    }

    pub fn usage(&self) -> &FrozenUsage {
        &self.usage
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    /// Target of symbolic link `inode`, if it was reached and is a symlink
    pub fn symlink_target(&mut self, inode: u32) -> Option<String> {
        let inode = self.inodes.get(&inode)?;
        inode.read_symbolic_link(&self.geometry, &mut self.medium)
    }

    /// Listing of everything reachable from the root
    pub fn tree(&mut self) -> FileTree {
        tree::render(
            &self.inodes,
            EXT2_ROOT_INO,
            self.options.hidden_marker,
            &self.geometry,
            &mut self.medium,
        )
    }

    /// Superblock free totals against the sums of the group descriptors
    fn verify_summary_counts(&mut self) {
        let descriptors: Option<Vec<_>> = self.groups.iter().map(|g| g.descriptor).collect();
        let Some(descriptors) = descriptors else {
            return;
        };

        let free_blocks: u64 = descriptors.iter().map(|d| d.bg_free_blocks_count as u64).sum();
        let free_inodes: u64 = descriptors.iter().map(|d| d.bg_free_inodes_count as u64).sum();

        if self.geometry.free_blocks_count as u64 != free_blocks {
            self.add_error(format!(
                "Incorrect free blocks count in superblock (is {}, groups have {})",
                self.geometry.free_blocks_count, free_blocks
            ));
        }
        if self.geometry.free_inodes_count as u64 != free_inodes {
            self.add_error(format!(
                "Incorrect free inodes count in superblock (is {}, groups have {})",
                self.geometry.free_inodes_count, free_inodes
            ));
        }
    }
}
