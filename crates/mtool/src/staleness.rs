//! Staleness filter selecting the derivatives that need to be (re)built.
//!
//! Freshness is judged by modification time alone, truncated to whole
//! seconds: an output is stale when it is missing or strictly older than its
//! master. Content is never hashed, so an output touched after its master is
//! considered current, and clock skew between filesystems is not corrected.

use crate::catalog::unix_seconds;
use crate::derivative::Derivative;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// True when an output with `output_mtime` must be rebuilt from a master
/// modified at `master_mtime`.
pub fn is_stale(output_mtime: Option<SystemTime>, master_mtime: SystemTime) -> bool {
    match output_mtime {
        None => true,
        Some(out) => unix_seconds(out) < unix_seconds(master_mtime),
    }
}

/// Joins every output path with `output_root`, records the mtime of any
/// existing output, and keeps only the stale derivatives.
pub fn filter_stale(derivatives: Vec<Derivative>, output_root: &Path) -> Vec<Derivative> {
    derivatives
        .into_iter()
        .filter_map(|mut d| {
            d.output_path = output_root.join(&d.output_path);
            d.output_mtime = fs::metadata(&d.output_path)
                .and_then(|m| m.modified())
                .ok();
            is_stale(d.output_mtime, d.master_mtime).then_some(d)
        })
        .collect()
}
