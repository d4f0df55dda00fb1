// ext2 consistency audit
// Rebuilds usage from the directory tree and checks it against the on-disk bitmaps

pub mod bitmap;
pub mod block_group;
pub mod constants;
pub mod directory;
pub mod filesystem;
pub mod inode;
pub mod report;
pub mod superblock;
pub mod tree;
pub mod usage;
pub mod walker;

// Re-export the audit entry point and its results
pub use self::filesystem::Ext2Filesystem;
pub use self::report::AuditReport;
pub use self::tree::{FileTree, TreeEntry};
// Re-export building blocks used by tools and tests
pub use self::block_group::{BlockGroup, GroupDescriptor};
pub use self::directory::DirEntry;
pub use self::inode::{FileType, Inode, InodeLookupError};
pub use self::superblock::{Geometry, Superblock};
pub use self::usage::{FrozenUsage, UsageTracker};
