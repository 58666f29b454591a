//! Local-disk object store with named backends.
//!
//! Each configured "disk" maps a name to a root directory. Prefixes are
//! slash-separated object paths resolved beneath the disk root; removing a
//! prefix deletes the directory subtree and reports how much was freed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::config::StorageConfig;
use crate::{AppError, Result};

use super::{BoxFuture, ObjectStore, PurgeSummary};

/// [`ObjectStore`] over local directories.
pub struct LocalDiskStore {
    disks: std::collections::HashMap<String, PathBuf>,
}

impl LocalDiskStore {
    /// Build a store from the configured disk map.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            disks: config.disks.clone(),
        }
    }

    fn resolve(&self, disk: &str, prefix: &str) -> Result<PathBuf> {
        let root = self
            .disks
            .get(disk)
            .ok_or_else(|| AppError::Storage(format!("unknown storage disk '{disk}'")))?;

        // Object prefixes must stay beneath the disk root.
        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(AppError::Storage(format!(
                "invalid storage prefix '{prefix}'"
            )));
        }
        Ok(root.join(relative))
    }

    fn remove_prefix_sync(&self, disk: &str, prefix: &str) -> Result<PurgeSummary> {
        let target = self.resolve(disk, prefix)?;
        if !target.exists() {
            return Ok(PurgeSummary::default());
        }

        let mut summary = PurgeSummary::default();
        measure_tree(&target, &mut summary)?;
        fs::remove_dir_all(&target)
            .map_err(|err| AppError::Storage(format!("failed to delete '{prefix}': {err}")))?;

        info!(
            disk,
            prefix,
            files = summary.files_removed,
            bytes = summary.bytes_freed,
            "storage prefix purged"
        );
        Ok(summary)
    }
}

/// Accumulate file and byte counts for a directory subtree.
fn measure_tree(path: &Path, summary: &mut PurgeSummary) -> Result<()> {
    let entries = fs::read_dir(path)
        .map_err(|err| AppError::Storage(format!("failed to read '{}': {err}", path.display())))?;
    for entry in entries {
        let entry = entry
            .map_err(|err| AppError::Storage(format!("failed to read dir entry: {err}")))?;
        let metadata = entry
            .metadata()
            .map_err(|err| AppError::Storage(format!("failed to stat entry: {err}")))?;
        if metadata.is_dir() {
            measure_tree(&entry.path(), summary)?;
        } else {
            summary.files_removed += 1;
            summary.bytes_freed += metadata.len();
        }
    }
    Ok(())
}

impl ObjectStore for LocalDiskStore {
    fn remove_prefix(&self, disk: &str, prefix: &str) -> BoxFuture<'_, Result<PurgeSummary>> {
        let disk = disk.to_owned();
        let prefix = prefix.to_owned();
        Box::pin(async move { self.remove_prefix_sync(&disk, &prefix) })
    }
}
