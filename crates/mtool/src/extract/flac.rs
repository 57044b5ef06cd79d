//! FLAC master inspection through `metaflac`.
//!
//! A FLAC master may hold a whole album with an embedded cue sheet, in which
//! case it carries one TITLE comment per track.

use super::{clean_tag, year_of, ExtractError, Extractor};
use crate::catalog::{MasterFile, MediaKind};
use std::path::Path;
use std::process::Command;

/// Vorbis comments of interest, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VorbisTags {
    pub artist: String,
    pub album: String,
    pub date: String,
    pub titles: Vec<String>,
    pub track_num: u32,
    pub track_max: u32,
}

/// Parses `KEY=value` lines as printed by `metaflac --export-tags-to=-`.
///
/// Nonstandard `KEY[N]` suffixes are discarded and keys are matched
/// case-insensitively.
pub fn parse_vorbis_comments(text: &str) -> VorbisTags {
    let mut tags = VorbisTags::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.split('[').next().unwrap_or_default().to_uppercase();
        match key.as_str() {
            "ARTIST" => tags.artist = clean_tag(value),
            "ALBUM" => tags.album = clean_tag(value),
            "DATE" => tags.date = year_of(value),
            "TITLE" => tags.titles.push(clean_tag(value)),
            "TRACKNUMBER" => tags.track_num = clean_tag(value).parse().unwrap_or(0),
            "TRACKTOTAL" | "TOTALTRACKS" => tags.track_max = clean_tag(value).parse().unwrap_or(0),
            _ => {}
        }
    }

    tags
}

/// Extractor for FLAC masters.
#[derive(Debug, Clone)]
pub struct FlacExtractor {
    metaflac: String,
}

impl FlacExtractor {
    pub fn new(metaflac: &str) -> Self {
        Self {
            metaflac: metaflac.to_string(),
        }
    }

    fn run(&self, args: &[&str], path: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.metaflac)
            .args(args)
            .arg(path)
            .output()
            .map_err(|source| ExtractError::Spawn {
                tool: self.metaflac.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::ToolFailed {
                tool: self.metaflac.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Fill an audio master from parsed comments.
///
/// Valid iff the first title is non-empty.
pub fn apply_vorbis(master: &mut MasterFile, tags: VorbisTags, has_picture: bool) {
    master.kind = MediaKind::Audio;
    master.artist = tags.artist;
    master.album = tags.album;
    master.date = tags.date;
    master.track_num = tags.track_num;
    master.track_max = tags.track_max;
    master.title = tags.titles;
    master.has_picture = has_picture;

    master.valid = master.title.first().is_some_and(|t| !t.is_empty());
}

impl Extractor for FlacExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["flac"]
    }

    fn extract(&self, master: &mut MasterFile) -> Result<(), ExtractError> {
        let comments = self.run(&["--export-tags-to=-"], &master.path)?;
        let pictures = self.run(&["--list", "--block-type=PICTURE"], &master.path)?;
        apply_vorbis(
            master,
            parse_vorbis_comments(&comments),
            !pictures.trim().is_empty(),
        );
        Ok(())
    }
}
