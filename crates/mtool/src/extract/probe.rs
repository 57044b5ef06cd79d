//! ffprobe-backed extractors.
//!
//! Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
//! and maps the JSON document onto a [`MasterFile`]. Container masters
//! (mkv, mp4) record their elementary streams; tagged audio masters
//! (mp3, m4a) record artist/album/track tags.

use super::{clean_tag, parse_track, year_of, ExtractError, Extractor};
use crate::catalog::{MasterFile, MediaKind, StreamDescriptor};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: usize,
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub bit_rate: Option<String>,
        #[serde(default)]
        pub tags: HashMap<String, String>,
        #[serde(default)]
        pub disposition: HashMap<String, i64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        #[serde(default)]
        pub tags: HashMap<String, String>,
    }
}

/// Probe output reduced to what the extractors need.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeResult {
    pub streams: Vec<StreamDescriptor>,
    /// Format-level tags with lower-cased keys.
    pub tags: HashMap<String, String>,
    /// True when a stream is flagged as an attached picture.
    pub has_picture: bool,
}

impl ProbeResult {
    fn tag(&self, key: &str) -> String {
        self.tags.get(key).map(|v| clean_tag(v)).unwrap_or_default()
    }
}

/// Runs ffprobe on a file and parses its JSON output.
pub fn probe_file(ffprobe: &str, path: &Path) -> Result<ProbeResult, ExtractError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|source| ExtractError::Spawn {
            tool: ffprobe.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ExtractError::ToolFailed {
            tool: ffprobe.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses ffprobe JSON output into a [`ProbeResult`].
///
/// Stream descriptors are kept in index order; a stream whose index does not
/// equal its position is rejected. Streams that are neither audio, video nor
/// subtitle are kept as [`MediaKind::Unknown`] so the positions still line up.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ExtractError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ExtractError::Parse {
            tool: "ffprobe".to_string(),
            reason: e.to_string(),
        })?;

    let format = ffprobe.format.ok_or_else(|| ExtractError::Parse {
        tool: "ffprobe".to_string(),
        reason: "missing format information".to_string(),
    })?;

    let mut result = ProbeResult {
        tags: lowercase_keys(format.tags),
        ..ProbeResult::default()
    };

    for (position, stream) in ffprobe.streams.unwrap_or_default().into_iter().enumerate() {
        if stream.index != position {
            return Err(ExtractError::IndexMismatch {
                expected: position,
                found: stream.index,
            });
        }

        if stream.disposition.get("attached_pic").copied().unwrap_or(0) != 0 {
            result.has_picture = true;
        }

        let kind = match stream.codec_type.as_deref() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            Some("subtitle") => MediaKind::Subtitle,
            _ => MediaKind::Unknown,
        };

        let tags = lowercase_keys(stream.tags);
        let language = tags
            .get("language")
            .map(|l| clean_tag(l))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "und".to_string());

        result.streams.push(StreamDescriptor {
            kind,
            codec: stream.codec_name.unwrap_or_default(),
            language,
            bitrate: stream_bitrate_kbps(stream.bit_rate.as_deref(), &tags),
        });
    }

    Ok(result)
}

/// Bitrate in kb/s from `bit_rate`, falling back to the Matroska `BPS` tag.
fn stream_bitrate_kbps(bit_rate: Option<&str>, tags: &HashMap<String, String>) -> u32 {
    let bps = bit_rate
        .or_else(|| tags.get("bps").map(String::as_str))
        .or_else(|| tags.get("bps-eng").map(String::as_str))
        .and_then(|b| b.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (bps / 1000) as u32
}

fn lowercase_keys(tags: HashMap<String, String>) -> HashMap<String, String> {
    tags.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

/// Fill a video master from a probe result.
///
/// Valid iff there is a non-empty title and at least one stream.
pub fn apply_container(master: &mut MasterFile, probe: ProbeResult) {
    master.kind = MediaKind::Video;

    let title = probe.tag("title");
    if !title.is_empty() {
        master.title.push(title);
    }
    master.show = probe.tag("show");
    master.episode = probe.tag("episode_id");
    master.date = probe.tag("date");
    master.has_picture = probe.has_picture;
    master.streams = probe.streams;

    master.valid = !master.title.is_empty() && !master.streams.is_empty();
}

/// Fill an audio master from a probe result.
pub fn apply_tags(master: &mut MasterFile, probe: ProbeResult) {
    master.kind = MediaKind::Audio;

    master.title = vec![probe.tag("title")];
    master.artist = probe.tag("artist");
    master.album = probe.tag("album");
    master.date = year_of(&probe.tag("date"));
    let (num, max) = parse_track(&probe.tag("track"));
    master.track_num = num;
    master.track_max = max;
    master.has_picture = probe.has_picture;

    master.valid = true;
}

/// Extractor for video container masters.
#[derive(Debug, Clone)]
pub struct ContainerExtractor {
    ffprobe: String,
}

impl ContainerExtractor {
    pub fn new(ffprobe: &str) -> Self {
        Self {
            ffprobe: ffprobe.to_string(),
        }
    }
}

impl Extractor for ContainerExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["mkv", "mp4"]
    }

    fn extract(&self, master: &mut MasterFile) -> Result<(), ExtractError> {
        let probe = probe_file(&self.ffprobe, &master.path)?;
        apply_container(master, probe);
        Ok(())
    }
}

/// Extractor for tagged lossy audio masters.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    ffprobe: String,
}

impl TagExtractor {
    pub fn new(ffprobe: &str) -> Self {
        Self {
            ffprobe: ffprobe.to_string(),
        }
    }
}

impl Extractor for TagExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["m4a", "mp3"]
    }

    fn extract(&self, master: &mut MasterFile) -> Result<(), ExtractError> {
        let probe = probe_file(&self.ffprobe, &master.path)?;
        apply_tags(master, probe);
        Ok(())
    }
}
