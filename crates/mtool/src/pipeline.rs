//! Two-stage external process pipeline.
//!
//! A decoder writes a byte stream to its stdout, which is connected through
//! an OS pipe to the stdin of an encoder. The pipe's bounded buffer blocks
//! the decoder whenever the encoder falls behind. The decoder is started
//! first, the encoder is run to completion, then the decoder is reaped; a
//! failure in any of the three steps is reported with its own label.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Step of the pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Run,
    Wait,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Start => write!(f, "start"),
            Stage::Run => write!(f, "run"),
            Stage::Wait => write!(f, "wait"),
        }
    }
}

/// Error type for pipeline execution
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The decoder could not be started.
    #[error("crashed starting {program}: {source}")]
    Start {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The encoder could not be run or exited unsuccessfully.
    #[error("crashed running {program}: {reason}")]
    Run { program: String, reason: String },

    /// Waiting for the decoder failed or it exited unsuccessfully.
    #[error("crashed waiting for {program}: {reason}")]
    Wait { program: String, reason: String },

    /// A stage outlived the per-item timeout and was killed.
    #[error("{program} killed after exceeding {timeout:?} ({stage} stage)")]
    Timeout {
        program: String,
        stage: Stage,
        timeout: Duration,
    },
}

impl PipelineError {
    /// The stage this error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Start { .. } => Stage::Start,
            PipelineError::Run { .. } => Stage::Run,
            PipelineError::Wait { .. } => Stage::Wait,
            PipelineError::Timeout { stage, .. } => *stage,
        }
    }
}

/// A decoder piped into an encoder.
#[derive(Debug)]
pub struct Pipeline {
    decoder: Command,
    encoder: Command,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(decoder: Command, encoder: Command) -> Self {
        Self {
            decoder,
            encoder,
            timeout: None,
        }
    }

    /// Kill both stages if the pipeline runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the pipeline to completion.
    pub fn run(mut self) -> Result<(), PipelineError> {
        let decoder_name = program_name(&self.decoder);
        let encoder_name = program_name(&self.encoder);
        let deadline = self.timeout.map(|t| Instant::now() + t);

        self.decoder
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut decoder = self.decoder.spawn().map_err(|source| PipelineError::Start {
            program: decoder_name.clone(),
            source,
        })?;
        let decoder_stderr = capture_stderr(&mut decoder);
        debug!(decoder = %decoder_name, encoder = %encoder_name, "pipeline started");

        let Some(stream) = decoder.stdout.take() else {
            abort(&mut decoder);
            return Err(PipelineError::Start {
                program: decoder_name,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "decoder stdout not captured"),
            });
        };
        let mut encoder = self.encoder;
        encoder.stdin(Stdio::from(stream));

        if let Err(e) = run_stage(encoder, &encoder_name, Stage::Run, deadline, self.timeout) {
            abort(&mut decoder);
            let _ = collect_stderr(decoder_stderr);
            return Err(e);
        }

        match wait_until(&mut decoder, deadline) {
            Ok(Waited::Exited(status)) if status.success() => {
                let _ = collect_stderr(decoder_stderr);
                Ok(())
            }
            Ok(Waited::Exited(status)) => Err(PipelineError::Wait {
                program: decoder_name,
                reason: failure_reason(status, collect_stderr(decoder_stderr)),
            }),
            Ok(Waited::TimedOut) => {
                let _ = collect_stderr(decoder_stderr);
                Err(PipelineError::Timeout {
                    program: decoder_name,
                    stage: Stage::Wait,
                    timeout: self.timeout.unwrap_or_default(),
                })
            }
            Err(e) => Err(PipelineError::Wait {
                program: decoder_name,
                reason: e.to_string(),
            }),
        }
    }
}

/// Run a single process to completion, for profiles that need no pipe.
pub fn run_single(mut command: Command, timeout: Option<Duration>) -> Result<(), PipelineError> {
    let name = program_name(&command);
    let deadline = timeout.map(|t| Instant::now() + t);
    command.stdin(Stdio::null());
    run_stage(command, &name, Stage::Run, deadline, timeout)
}

/// Spawn `command`, wait for it, and map every failure onto `stage`.
///
/// The command is dropped as soon as the child is running so that any pipe
/// end it was given closes in this process.
fn run_stage(
    mut command: Command,
    name: &str,
    stage: Stage,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
) -> Result<(), PipelineError> {
    let fail = |reason: String| match stage {
        Stage::Wait => PipelineError::Wait {
            program: name.to_string(),
            reason,
        },
        _ => PipelineError::Run {
            program: name.to_string(),
            reason,
        },
    };

    command.stdout(Stdio::null()).stderr(Stdio::piped());
    let spawned = command.spawn();
    drop(command);
    let mut child = spawned.map_err(|e| fail(e.to_string()))?;
    let stderr = capture_stderr(&mut child);

    match wait_until(&mut child, deadline) {
        Ok(Waited::Exited(status)) if status.success() => {
            let _ = collect_stderr(stderr);
            Ok(())
        }
        Ok(Waited::Exited(status)) => Err(fail(failure_reason(status, collect_stderr(stderr)))),
        Ok(Waited::TimedOut) => {
            let _ = collect_stderr(stderr);
            Err(PipelineError::Timeout {
                program: name.to_string(),
                stage,
                timeout: timeout.unwrap_or_default(),
            })
        }
        Err(e) => Err(fail(e.to_string())),
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
}

/// Wait for `child`, killing it once `deadline` has passed.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> io::Result<Waited> {
    let Some(deadline) = deadline else {
        return child.wait().map(Waited::Exited);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Waited::Exited(status));
        }
        if Instant::now() >= deadline {
            abort(child);
            return Ok(Waited::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn abort(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Drain a child's stderr on a helper thread so it can never fill up.
fn capture_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).trim().to_string()
        })
    })
}

fn collect_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn failure_reason(status: ExitStatus, stderr: String) -> String {
    if stderr.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, stderr)
    }
}

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn write_to(path: &Path) -> Command {
        sh(&format!("cat > '{}'", path.display()))
    }

    #[test]
    fn test_pipeline_moves_bytes_from_decoder_to_encoder() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out.raw");

        Pipeline::new(sh("printf 'decoded audio'"), write_to(&out))
            .run()
            .unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap(), "decoded audio");
    }

    #[test]
    fn test_pipeline_streams_more_than_a_pipe_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("count.txt");

        Pipeline::new(
            sh("head -c 1000000 /dev/zero"),
            sh(&format!("wc -c > '{}'", out.display())),
        )
        .run()
        .unwrap();

        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "1000000");
    }

    #[test]
    fn test_decoder_that_cannot_start_is_start_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = Pipeline::new(
            Command::new("/nonexistent/decoder"),
            write_to(&temp_dir.path().join("x")),
        )
        .run()
        .unwrap_err();

        assert_eq!(err.stage(), Stage::Start);
        assert!(err.to_string().contains("/nonexistent/decoder"));
    }

    #[test]
    fn test_failing_encoder_is_run_error_with_stderr() {
        let err = Pipeline::new(
            sh("printf data"),
            sh("cat > /dev/null; echo 'bad bitrate' >&2; exit 3"),
        )
        .run()
        .unwrap_err();

        assert_eq!(err.stage(), Stage::Run);
        assert!(err.to_string().contains("bad bitrate"), "{}", err);
    }

    #[test]
    fn test_missing_encoder_is_run_error() {
        let err = Pipeline::new(sh("printf data"), Command::new("/nonexistent/encoder"))
            .run()
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Run);
    }

    #[test]
    fn test_failing_decoder_is_wait_error() {
        let err = Pipeline::new(
            sh("printf data; echo 'corrupt frame' >&2; exit 2"),
            sh("cat > /dev/null"),
        )
        .run()
        .unwrap_err();

        assert_eq!(err.stage(), Stage::Wait);
        assert!(err.to_string().contains("corrupt frame"), "{}", err);
    }

    #[test]
    fn test_hung_encoder_is_killed_after_timeout() {
        let mut hung = Command::new("sleep");
        hung.arg("30");
        let started = Instant::now();
        let err = Pipeline::new(sh("printf data"), hung)
            .with_timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { stage: Stage::Run, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_encoder_that_ignores_its_input_does_not_block_the_decoder() {
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let result = Pipeline::new(Command::new("yes"), sh("exit 0")).run();
            let _ = tx.send(result);
        });

        // yes only stops once the read end of the pipe is gone
        let result = rx
            .recv_timeout(Duration::from_secs(20))
            .expect("pipeline did not finish");
        let err = result.unwrap_err();
        assert_eq!(err.stage(), Stage::Wait);
    }

    #[test]
    fn test_run_single_reports_exit_status() {
        run_single(sh("exit 0"), None).unwrap();

        let err = run_single(sh("echo 'no such stream' >&2; exit 1"), None).unwrap_err();
        assert_eq!(err.stage(), Stage::Run);
        assert!(err.to_string().contains("no such stream"));
    }
}
