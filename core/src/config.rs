// Options controlling how strict an audit is and how results are rendered

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditOptions {
    /// Names starting with this character are left out of the tree listing
    pub hidden_marker: char,
    /// Validate indirect pointer blocks as well as the data blocks they lead to
    pub strict_indirect_pointers: bool,
    /// Compare superblock free totals with the sum of the group descriptors
    pub verify_summary_counts: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            hidden_marker: '.',
            strict_indirect_pointers: true,
            verify_summary_counts: true,
        }
    }
}

impl AuditOptions {
    /// Only the final data block numbers are range checked
    pub fn lenient() -> Self {
        Self {
            strict_indirect_pointers: false,
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, AuditError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load options from a JSON file; missing keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AuditError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&text)
    }
}
