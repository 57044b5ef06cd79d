//! Metadata extractors for master files.
//!
//! Extractors are keyed by lower-case file extension in an explicit
//! [`ExtractorRegistry`] built at startup. Each extractor fills in the
//! descriptive fields of a [`MasterFile`] and sets its validity flag when it
//! succeeds. Extraction runs inside a panic boundary so that a crash while
//! inspecting one file only invalidates that file.

pub mod flac;
pub mod probe;

use crate::catalog::{file_extension, MasterFile};
use crate::config::ToolsConfig;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

pub use flac::FlacExtractor;
pub use probe::{ContainerExtractor, TagExtractor};

/// Error type for metadata extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The external inspection tool could not be run.
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The external inspection tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Tool output could not be parsed.
    #[error("failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },

    /// A container reported streams out of index order.
    #[error("stream index {found} out of order, expected {expected}")]
    IndexMismatch { expected: usize, found: usize },
}

/// A format-specific metadata inspector.
pub trait Extractor: Send + Sync {
    /// Lower-case extensions (without the dot) handled by this extractor.
    fn extensions(&self) -> &[&'static str];

    /// Populate `master` from the file at `master.path`.
    ///
    /// Implementations set `master.valid` only when the entry is usable.
    fn extract(&self, master: &mut MasterFile) -> Result<(), ExtractError>;
}

/// Outcome of running the registry on one path.
#[derive(Debug)]
pub enum Extraction {
    /// No extractor is registered for the extension; the file is ignored.
    Unrecognized,
    /// An extractor ran but the file is unusable.
    Invalid(String),
    /// A populated, valid entry.
    Valid(MasterFile),
}

/// Extension to extractor lookup table.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_ext: BTreeMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock extractors for flac, mp3, m4a, mkv and mp4.
    pub fn with_defaults(tools: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FlacExtractor::new(&tools.metaflac)));
        registry.register(Arc::new(TagExtractor::new(&tools.ffprobe)));
        registry.register(Arc::new(ContainerExtractor::new(&tools.ffprobe)));
        registry
    }

    /// Register an extractor for every extension it declares, replacing
    /// earlier registrations.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_ext.insert(ext.to_string(), extractor.clone());
        }
    }

    /// Registered extensions in sorted order.
    pub fn extensions(&self) -> Vec<&str> {
        self.by_ext.keys().map(String::as_str).collect()
    }

    pub fn handles(&self, path: &Path) -> bool {
        self.by_ext.contains_key(&file_extension(path))
    }

    /// Build a fresh entry for `path` and run the matching extractor on it.
    pub fn extract(&self, path: &Path, mtime: SystemTime) -> Extraction {
        let Some(extractor) = self.by_ext.get(&file_extension(path)) else {
            return Extraction::Unrecognized;
        };

        let mut master = MasterFile::new(path, mtime);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(&mut master)));

        match outcome {
            Ok(Ok(())) if master.valid => Extraction::Valid(master),
            Ok(Ok(())) => Extraction::Invalid("extractor rejected file".to_string()),
            Ok(Err(e)) => Extraction::Invalid(e.to_string()),
            Err(payload) => Extraction::Invalid(format!(
                "extractor panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Strip whitespace and NUL padding left behind by sloppy tag editors.
pub(crate) fn clean_tag(value: &str) -> String {
    value
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

/// Year part of a date tag such as "1999-04-01".
pub(crate) fn year_of(date: &str) -> String {
    clean_tag(date.split('-').next().unwrap_or_default())
}

/// Parse "n" or "n/m" track tags.
pub(crate) fn parse_track(value: &str) -> (u32, u32) {
    let mut parts = value.splitn(2, '/');
    let num = parts
        .next()
        .and_then(|n| clean_tag(n).parse().ok())
        .unwrap_or(0);
    let max = parts
        .next()
        .and_then(|m| clean_tag(m).parse().ok())
        .unwrap_or(0);
    (num, max)
}
