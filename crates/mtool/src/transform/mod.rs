//! Output profiles.
//!
//! A profile is a [`Transform`]: a pure projection from master files to
//! derivatives plus a materialization that builds one derivative on disk by
//! running external tools. Profiles are looked up by name in a
//! [`TransformRegistry`] built once at startup.

pub mod audio;
pub mod select;
pub mod webm;

use crate::catalog::MasterFile;
use crate::config::Config;
use crate::derivative::Derivative;
use crate::pipeline::{PipelineError, Stage};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use audio::{AudioCodec, AudioTransform};
pub use select::{select_audio_stream, StreamSelection};
pub use webm::WebmTransform;

/// Error type for profile lookup.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown profile '{name}' (available: {available})")]
    UnknownProfile { name: String, available: String },
}

/// Error type for materializing a single derivative.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare artwork: {0}")]
    TempFile(#[source] io::Error),

    #[error("failed to export artwork: {0}")]
    Artwork(#[source] PipelineError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl MaterializeError {
    /// Pipeline stage the failure is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MaterializeError::Pipeline(e) | MaterializeError::Artwork(e) => Some(e.stage()),
            _ => None,
        }
    }
}

/// A named output profile.
pub trait Transform: Send + Sync {
    /// Profile name used on the command line.
    fn name(&self) -> &str;

    /// Derivatives this profile would build from `masters`.
    ///
    /// Must not touch the filesystem. Output paths are relative to the output
    /// root.
    fn project(&self, masters: &[MasterFile]) -> Vec<Derivative>;

    /// Build one derivative whose `output_path` is already absolute.
    fn materialize(&self, derivative: &Derivative) -> Result<(), MaterializeError>;
}

/// Profile name to transform lookup.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in audio and video profiles.
    pub fn with_defaults(config: &Config) -> Self {
        let timeout = item_timeout(config.transcode.item_timeout_secs);
        let mut registry = Self::new();
        for codec in [AudioCodec::Opus, AudioCodec::Aac, AudioCodec::Mp3] {
            registry.register(Arc::new(AudioTransform::new(
                codec,
                config.tools.clone(),
                timeout,
            )));
        }
        registry.register(Arc::new(WebmTransform::new(
            config.tools.ffmpeg.clone(),
            config.transcode.language.clone(),
            timeout,
        )));
        registry
    }

    /// Add a profile, replacing any profile of the same name.
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        self.transforms
            .insert(transform.name().to_string(), transform);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Transform>, TransformError> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| TransformError::UnknownProfile {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Registered profile names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.transforms.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("profiles", &self.names())
            .finish()
    }
}

/// Per-item timeout, zero meaning none.
pub fn item_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Create the directory an output file will land in.
pub(crate) fn create_parent_dir(output: &Path) -> Result<(), MaterializeError> {
    let Some(parent) = output.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|source| MaterializeError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })
}
