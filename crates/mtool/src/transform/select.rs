//! Stream selection for multi-stream video masters.
//!
//! The first video stream is always kept. Exactly one audio stream is kept,
//! ranked by a stable sort:
//!
//! 1. streams in the preferred language,
//! 2. then untagged ("und") streams, since discs often leave the primary
//!    track untagged while tagging the alternates correctly,
//! 3. then by descending bitrate.
//!
//! Every subtitle stream in the preferred language is kept.

use crate::catalog::{MediaKind, StreamDescriptor};
use std::cmp::Ordering;

/// Language tag of streams with no language metadata.
pub const UNDETERMINED: &str = "und";

/// Stream indices to map into the output, in container index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
    pub subtitles: Vec<usize>,
}

impl StreamSelection {
    /// Select streams from a master's descriptor list.
    pub fn choose(streams: &[StreamDescriptor], language: &str) -> Self {
        Self {
            video: streams.iter().position(|s| s.kind == MediaKind::Video),
            audio: select_audio_stream(streams, language),
            subtitles: streams
                .iter()
                .enumerate()
                .filter(|(_, s)| s.kind == MediaKind::Subtitle && s.language == language)
                .map(|(i, _)| i)
                .collect(),
        }
    }

    /// `-map 0:N` arguments in video, audio, subtitle order.
    pub fn map_args(&self) -> Vec<String> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .chain(self.subtitles.iter())
            .flat_map(|i| ["-map".to_string(), format!("0:{}", i)])
            .collect()
    }
}

/// Pick the audio stream to keep, `None` when there are no audio streams.
///
/// # Arguments
///
/// * `streams` - Descriptors in container index order
/// * `language` - Preferred ISO 639-2 language tag
///
/// # Returns
///
/// The container index of the winning stream.
pub fn select_audio_stream(streams: &[StreamDescriptor], language: &str) -> Option<usize> {
    let mut audio: Vec<(usize, &StreamDescriptor)> = streams
        .iter()
        .enumerate()
        .filter(|(_, s)| s.kind == MediaKind::Audio)
        .collect();

    // sort_by is stable, so equal streams keep container order
    audio.sort_by(|(_, a), (_, b)| rank(a, b, language));
    audio.first().map(|(i, _)| *i)
}

fn rank(a: &StreamDescriptor, b: &StreamDescriptor, language: &str) -> Ordering {
    let preferred = |s: &StreamDescriptor| s.language == language;
    let untagged = |s: &StreamDescriptor| s.language == UNDETERMINED;

    preferred(b)
        .cmp(&preferred(a))
        .then_with(|| untagged(b).cmp(&untagged(a)))
        .then_with(|| b.bitrate.cmp(&a.bitrate))
}
