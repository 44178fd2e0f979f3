//! Inventory domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Target hosts for a job.
///
/// Either a static list of hosts (rendered as a comma-terminated
/// pattern, the form ansible expects for inline inventories) or a path
/// to an inventory file/script on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Option<Uuid>,
    pub hosts: Vec<String>,
    pub source_file: Option<PathBuf>,
}

impl Inventory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            organization_id: None,
            hosts: Vec::new(),
            source_file: None,
        }
    }

    /// The value handed to `-i`, or `None` when this inventory has no
    /// usable target source at all.
    pub fn target_argument(&self) -> Option<String> {
        if let Some(file) = &self.source_file {
            return Some(file.to_string_lossy().into_owned());
        }
        if self.hosts.is_empty() {
            return None;
        }
        // "host1,host2," with a trailing comma marking an inline host list.
        Some(format!("{},", self.hosts.join(",")))
    }
}
