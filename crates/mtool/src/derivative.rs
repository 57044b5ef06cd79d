//! Derivative ("image") files projected from master files.
//!
//! A [`Derivative`] is computed fresh on every transcode run and never
//! persisted. Its output path starts out relative to the output root and is
//! made absolute by the staleness filter.

use crate::catalog::StreamDescriptor;
use std::path::PathBuf;
use std::time::SystemTime;

/// Placeholder used when a sanitized path component would be empty.
pub const EMPTY_COMPONENT: &str = "null";

/// One output file to be produced from a master.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    /// Output location; relative until staleness filtering joins the root.
    pub output_path: PathBuf,
    /// Modification time of an existing output file, if any.
    pub output_mtime: Option<SystemTime>,
    pub master_path: PathBuf,
    pub master_mtime: SystemTime,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub date: String,
    pub track: u32,
    pub track_max: u32,
    /// Cue sheet track to cut from a multi-track master.
    pub cue_track: Option<u32>,
    pub has_picture: bool,
    pub streams: Vec<StreamDescriptor>,
}

impl Derivative {
    /// A derivative of `master_path` with every tag field empty.
    pub fn new(
        output_path: impl Into<PathBuf>,
        master_path: impl Into<PathBuf>,
        master_mtime: SystemTime,
    ) -> Self {
        Self {
            output_path: output_path.into(),
            output_mtime: None,
            master_path: master_path.into(),
            master_mtime,
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            date: String::new(),
            track: 0,
            track_max: 0,
            cue_track: None,
            has_picture: false,
            streams: Vec::new(),
        }
    }
}

/// Make a descriptive field usable as a single path component.
///
/// Quote, glob and shell-hostile characters are dropped, separators become
/// `-`, `&` becomes `+`. An empty result becomes [`EMPTY_COMPONENT`].
pub fn path_safe(input: &str) -> String {
    let out: String = input
        .chars()
        .filter_map(|c| match c {
            '?' | '*' | '"' | '\'' | '!' | '<' | '>' | '(' | ')' => None,
            '/' | '\\' | ':' | '#' => Some('-'),
            '&' => Some('+'),
            c => Some(c),
        })
        .collect();

    if out.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        out
    }
}
