//! Audio profiles: Opus, AAC and MP3.
//!
//! Every title of an audio master becomes one derivative. Masters are decoded
//! to WAV on stdout (`flac`, cutting a cue sheet track when the master holds a
//! whole album, or `ffmpeg` for anything else) and piped into the encoder.

use super::{create_parent_dir, MaterializeError, Transform};
use crate::catalog::{file_extension, MasterFile, MediaKind};
use crate::config::ToolsConfig;
use crate::derivative::{path_safe, Derivative};
use crate::pipeline::{run_single, Pipeline};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::TempPath;
use tracing::debug;

/// Encoder behind an audio profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
    Mp3,
}

impl AudioCodec {
    /// Profile name.
    pub fn name(self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "mp3",
        }
    }

    /// Output file extension.
    pub fn extension(self) -> &'static str {
        match self {
            AudioCodec::Opus => "opus",
            AudioCodec::Aac => "m4a",
            AudioCodec::Mp3 => "mp3",
        }
    }

    fn embeds_artwork(self) -> bool {
        !matches!(self, AudioCodec::Aac)
    }
}

/// One audio profile.
#[derive(Debug, Clone)]
pub struct AudioTransform {
    codec: AudioCodec,
    tools: ToolsConfig,
    timeout: Option<Duration>,
}

impl AudioTransform {
    pub fn new(codec: AudioCodec, tools: ToolsConfig, timeout: Option<Duration>) -> Self {
        Self {
            codec,
            tools,
            timeout,
        }
    }

    fn project_master(&self, master: &MasterFile) -> Vec<Derivative> {
        let multi = master.title.len() > 1;
        let track_max = if multi && master.track_max == 0 {
            master.title.len() as u32
        } else {
            master.track_max
        };

        master
            .title
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let track = if !multi && master.track_num > 0 {
                    master.track_num
                } else {
                    i as u32 + 1
                };
                let output = format!(
                    "{}/{}/{:02} {:.32}.{}",
                    path_safe(&master.artist),
                    path_safe(&master.album),
                    track,
                    path_safe(title),
                    self.codec.extension()
                );

                let mut d = Derivative::new(output, &master.path, master.mtime);
                d.title = title.clone();
                d.artist = master.artist.clone();
                d.album = master.album.clone();
                d.date = master.date.clone();
                d.track = track;
                d.track_max = track_max;
                d.cue_track = multi.then_some(track);
                d.has_picture = master.has_picture;
                d
            })
            .collect()
    }

    fn decoder(&self, d: &Derivative) -> Command {
        if file_extension(&d.master_path) == "flac" {
            let mut cmd = Command::new(&self.tools.flac);
            cmd.args(["--silent", "--decode", "--stdout"]);
            if let Some(n) = d.cue_track {
                cmd.arg(format!("--cue={}.1-{}.1", n, n + 1));
            }
            cmd.arg(&d.master_path);
            cmd
        } else {
            let mut cmd = Command::new(&self.tools.ffmpeg);
            cmd.arg("-i")
                .arg(&d.master_path)
                .args(["-f", "wav", "pipe:"]);
            cmd
        }
    }

    fn encoder(&self, d: &Derivative, artwork: Option<&Path>) -> Command {
        match self.codec {
            AudioCodec::Opus => {
                let mut cmd = Command::new(&self.tools.opusenc);
                cmd.arg("--quiet")
                    .args(["--artist", d.artist.as_str()])
                    .args(["--album", d.album.as_str()])
                    .args(["--title", d.title.as_str()])
                    .arg("--comment")
                    .arg(format!("TRACKNUMBER={}", d.track))
                    .args(["--padding", "0"]);
                if let Some(picture) = artwork {
                    cmd.arg("--picture").arg(picture);
                }
                cmd.arg("-").arg(&d.output_path);
                cmd
            }
            AudioCodec::Aac => {
                let mut cmd = Command::new(&self.tools.fdkaac);
                cmd.args(["--silent", "-b128"])
                    .args(["--artist", d.artist.as_str()])
                    .args(["--album", d.album.as_str()])
                    .args(["--title", d.title.as_str()])
                    .arg("--track")
                    .arg(track_spec(d))
                    .arg("-o")
                    .arg(&d.output_path)
                    .arg("-");
                cmd
            }
            AudioCodec::Mp3 => {
                let mut cmd = Command::new(&self.tools.lame);
                cmd.args(["--preset", "standard", "--quiet"])
                    .args(["--ta", d.artist.as_str()])
                    .args(["--tl", d.album.as_str()])
                    .args(["--tt", d.title.as_str()]);
                if let Some(year) = id3_year(&d.date) {
                    cmd.arg("--ty").arg(year.to_string());
                }
                cmd.arg("--tn").arg(track_spec(d));
                if let Some(picture) = artwork {
                    cmd.arg("--ti").arg(picture);
                }
                cmd.arg("-").arg(&d.output_path);
                cmd
            }
        }
    }

    /// Copy the master's embedded picture into a temporary file that is
    /// removed when the returned path is dropped.
    fn export_artwork(&self, d: &Derivative) -> Result<TempPath, MaterializeError> {
        let picture = tempfile::Builder::new()
            .prefix("mtool")
            .tempfile()
            .map_err(MaterializeError::TempFile)?
            .into_temp_path();

        let cmd = if file_extension(&d.master_path) == "flac" {
            let mut flag = OsString::from("--export-picture-to=");
            flag.push(picture.as_os_str());
            let mut cmd = Command::new(&self.tools.metaflac);
            cmd.arg(flag).arg(&d.master_path);
            cmd
        } else {
            let mut cmd = Command::new(&self.tools.ffmpeg);
            cmd.args(["-y", "-i"])
                .arg(&d.master_path)
                .args(["-an", "-c:v", "copy", "-f", "image2"])
                .arg(picture.as_os_str());
            cmd
        };

        run_single(cmd, self.timeout).map_err(MaterializeError::Artwork)?;
        Ok(picture)
    }
}

/// "n" or "n/m" when the track count is known.
fn track_spec(d: &Derivative) -> String {
    if d.track_max > 0 {
        format!("{}/{}", d.track, d.track_max)
    } else {
        d.track.to_string()
    }
}

/// Year for ID3 tagging, only when the date is a plain 1-9999 year.
fn id3_year(date: &str) -> Option<u32> {
    date.parse::<u32>()
        .ok()
        .filter(|y| (1..=9999).contains(y))
}

impl Transform for AudioTransform {
    fn name(&self) -> &str {
        self.codec.name()
    }

    fn project(&self, masters: &[MasterFile]) -> Vec<Derivative> {
        masters
            .iter()
            .filter(|m| m.kind == MediaKind::Audio)
            .flat_map(|m| self.project_master(m))
            .collect()
    }

    fn materialize(&self, d: &Derivative) -> Result<(), MaterializeError> {
        create_parent_dir(&d.output_path)?;

        let artwork = if d.has_picture && self.codec.embeds_artwork() {
            Some(self.export_artwork(d)?)
        } else {
            None
        };

        debug!(
            master = %d.master_path.display(),
            output = %d.output_path.display(),
            profile = self.name(),
            "encoding"
        );
        Pipeline::new(self.decoder(d), self.encoder(d, artwork.as_deref()))
            .with_timeout(self.timeout)
            .run()?;
        Ok(())
    }
}
