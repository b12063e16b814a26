//! Startup cleanup of abandoned generations.
//!
//! A crash mid-build leaves a `gen-*` directory that no pointer names; a
//! crash or failed delete after a swap leaves the retired one behind. Both
//! are removed here, before the coordinator opens the index directory. The
//! generation named by `ACTIVE` is never touched.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::generation::{remove_storage, IndexLayout, GENERATION_PREFIX};

/// What a reaper pass did.
#[derive(Debug, Default)]
pub struct ReapReport {
    pub kept: Option<String>,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Remove every generation directory other than the active one, plus any
/// leftover `ACTIVE.tmp`.
///
/// Only entries that look like generations are considered. Nothing here
/// fails startup: a missing or unlistable index directory and entries that
/// cannot be inspected or removed are logged and recorded in the report.
pub fn reap_orphans(layout: &IndexLayout) -> ReapReport {
    let mut report = ReapReport {
        kept: layout.read_active(),
        ..Default::default()
    };

    let entries = match std::fs::read_dir(layout.root()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(path = %layout.root().display(), error = %e, "could not list index directory");
            report.failed.push(layout.root().to_path_buf());
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %layout.root().display(), error = %e, "could not read directory entry");
                continue;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(GENERATION_PREFIX) || !entry.path().is_dir() {
            continue;
        }
        if IndexLayout::parse_generation_name(name) == report.kept.as_deref() {
            continue;
        }

        let path = entry.path();
        match remove_storage(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed orphaned generation");
                report.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not remove orphaned generation");
                report.failed.push(path);
            }
        }
    }

    let tmp = layout.pointer_tmp_path();
    if let Ok(meta) = std::fs::symlink_metadata(&tmp) {
        let removed = if meta.is_dir() {
            remove_storage(&tmp)
        } else {
            std::fs::remove_file(&tmp)
        };
        match removed {
            Ok(()) => report.removed.push(tmp),
            Err(e) => {
                warn!(path = %tmp.display(), error = %e, "could not remove stale pointer file");
                report.failed.push(tmp);
            }
        }
    }

    report
}
