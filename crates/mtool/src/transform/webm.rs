//! Video profile: VP9 + Opus in Matroska.
//!
//! One ffmpeg process per master. Only the streams picked by
//! [`StreamSelection`] are mapped; subtitles are re-encoded as
//! `dvd_subtitle` because stream copy fails between MPEG and Matroska.

use super::select::StreamSelection;
use super::{create_parent_dir, MaterializeError, Transform};
use crate::catalog::{MasterFile, MediaKind};
use crate::derivative::{path_safe, Derivative};
use crate::pipeline::run_single;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// The `webm` profile.
#[derive(Debug, Clone)]
pub struct WebmTransform {
    ffmpeg: String,
    language: String,
    timeout: Option<Duration>,
}

impl WebmTransform {
    pub fn new(ffmpeg: String, language: String, timeout: Option<Duration>) -> Self {
        Self {
            ffmpeg,
            language,
            timeout,
        }
    }

    fn output_path(master: &MasterFile, title: &str) -> String {
        if master.show.is_empty() {
            format!("movies/{}/{}.mkv", path_safe(&master.date), path_safe(title))
        } else {
            format!(
                "tv/{}/{} {}.mkv",
                path_safe(&master.show),
                path_safe(&master.episode),
                path_safe(title)
            )
        }
    }

    fn command(&self, d: &Derivative, selection: &StreamSelection) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-probesize", "200M", "-analyzeduration", "120M", "-i"])
            .arg(&d.master_path)
            .args(selection.map_args())
            .args(["-c:v", "libvpx-vp9", "-crf", "33", "-b:v", "0"])
            .args(["-c:a", "libopus", "-b:a", "192000"])
            .args(["-c:s", "dvd_subtitle"])
            .arg(&d.output_path);
        cmd
    }
}

impl Transform for WebmTransform {
    fn name(&self) -> &str {
        "webm"
    }

    fn project(&self, masters: &[MasterFile]) -> Vec<Derivative> {
        masters
            .iter()
            .filter(|m| m.kind == MediaKind::Video)
            .filter_map(|m| {
                let title = m.title.first()?;
                let mut d = Derivative::new(Self::output_path(m, title), &m.path, m.mtime);
                d.title = title.clone();
                d.date = m.date.clone();
                d.artist = m.artist.clone();
                d.album = m.album.clone();
                d.streams = m.streams.clone();
                Some(d)
            })
            .collect()
    }

    fn materialize(&self, d: &Derivative) -> Result<(), MaterializeError> {
        let selection = StreamSelection::choose(&d.streams, &self.language);
        if selection.audio.is_none() {
            warn!(master = %d.master_path.display(), "no audio streams, output will be silent");
        }
        debug!(master = %d.master_path.display(), ?selection, "selected streams");

        create_parent_dir(&d.output_path)?;
        run_single(self.command(d, &selection), self.timeout)?;
        Ok(())
    }
}
