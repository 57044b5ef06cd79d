//! Reconciler that keeps a catalog in step with its directory tree.
//!
//! Reconciliation is mark-and-sweep: every existing entry is marked invalid,
//! the tree is walked and each file either re-validates its entry (same
//! mtime), replaces it, or is appended; whatever is still invalid afterwards
//! is swept from the index. Work happens on a copy of the catalog, so a walk
//! error leaves the caller's catalog untouched.

use crate::catalog::Catalog;
use crate::extract::{Extraction, ExtractorRegistry};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Error type for reconciliation.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The directory walk failed; nothing was committed.
    #[error("fatal error scanning {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A walked file could not be stat'ed.
    #[error("fatal error reading metadata of {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// The platform reported no modification time for a walked file.
    #[error("fatal error reading modification time of {path}: {source}")]
    Mtime {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line of the reconciliation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    New(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
    Invalid { path: PathBuf, reason: String },
}

impl std::fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanEvent::New(path) => write!(f, "new file: {}", path.display()),
            ScanEvent::Changed(path) => write!(f, "changed file: {}", path.display()),
            ScanEvent::Deleted(path) => write!(f, "deleted file: {}", path.display()),
            ScanEvent::Invalid { path, reason } => {
                write!(f, "invalid file: {} ({})", path.display(), reason)
            }
        }
    }
}

/// Human-readable record of what a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub events: Vec<ScanEvent>,
    /// Files whose entry was re-validated without re-extraction.
    pub unchanged: usize,
}

impl ScanReport {
    fn push(&mut self, event: ScanEvent) {
        match &event {
            ScanEvent::Invalid { .. } => warn!("{}", event),
            _ => info!("{}", event),
        }
        self.events.push(event);
    }

    pub fn count(&self, pred: impl Fn(&ScanEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// True when the catalog contents did not change.
    pub fn is_noop(&self) -> bool {
        self.events
            .iter()
            .all(|e| matches!(e, ScanEvent::Invalid { .. }))
    }
}

/// A reconciled catalog together with its log.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub catalog: Catalog,
    pub report: ScanReport,
}

/// Builds a lookup from path to entry index.
fn index_by_path(catalog: &Catalog) -> HashMap<PathBuf, usize> {
    catalog
        .masters
        .iter()
        .enumerate()
        .map(|(i, mf)| (mf.path.clone(), i))
        .collect()
}

/// Reconciles `catalog` against the files currently under `catalog.root`.
///
/// The result contains exactly the discoverable, successfully extracted media
/// files. Files without a registered extractor are ignored; files whose
/// extraction fails are logged as invalid and left out. Running this twice on
/// an unchanged tree produces the same catalog and an empty log.
pub fn reconcile(
    catalog: &Catalog,
    extractors: &ExtractorRegistry,
) -> Result<Reconciliation, ScanError> {
    let mut next = catalog.clone();
    let mut report = ScanReport::default();
    let path_index = index_by_path(&next);

    for mf in next.masters.iter_mut() {
        mf.valid = false;
    }

    let root = next.root.clone();
    walk(&root, |path, mtime| {
        if !extractors.handles(path) {
            debug!(path = %path.display(), "no extractor for file, ignoring");
            return;
        }

        let existing = path_index.get(path).copied();

        if let Some(i) = existing {
            if next.masters[i].mtime == mtime {
                next.masters[i].valid = true;
                report.unchanged += 1;
                return;
            }
        }

        match extractors.extract(path, mtime) {
            Extraction::Unrecognized => {}
            Extraction::Invalid(reason) => {
                report.push(ScanEvent::Invalid {
                    path: path.to_path_buf(),
                    reason,
                });
            }
            Extraction::Valid(mut mf) => {
                mf.valid = true;
                match existing {
                    Some(i) => {
                        next.masters[i] = mf;
                        report.push(ScanEvent::Changed(path.to_path_buf()));
                    }
                    None => {
                        next.masters.push(mf);
                        report.push(ScanEvent::New(path.to_path_buf()));
                    }
                }
            }
        }
    })?;

    for mf in next.masters.iter().filter(|mf| !mf.valid) {
        report.push(ScanEvent::Deleted(mf.path.clone()));
    }
    next.compact();

    Ok(Reconciliation {
        catalog: next,
        report,
    })
}

/// Walks every non-directory entry under `root` in file-name order.
fn walk(
    root: &Path,
    mut visit: impl FnMut(&Path, SystemTime),
) -> Result<(), ScanError> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source,
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = entry.metadata().map_err(|source| ScanError::Metadata {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let mtime = modified(entry.path(), metadata.modified())?;

        visit(entry.path(), mtime);
    }

    Ok(())
}

/// The cheap path compares mtimes exactly, so a missing one cannot be
/// substituted.
fn modified(path: &Path, mtime: io::Result<SystemTime>) -> Result<SystemTime, ScanError> {
    mtime.map_err(|source| ScanError::Mtime {
        path: path.to_path_buf(),
        source,
    })
}
