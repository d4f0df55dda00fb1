// Filesystem audit engines
pub mod ext2_audit;

// Re-export the ext2 auditor
pub use ext2_audit::{AuditReport, Ext2Filesystem, FileTree, TreeEntry};
