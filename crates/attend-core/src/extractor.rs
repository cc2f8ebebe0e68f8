//! The face-embedding extraction seam.
//!
//! Extraction itself is a black box: image in, zero or more fixed-length
//! embeddings out. [`CommandExtractor`] adapts any external program that
//! reads a PNG on stdin and prints a JSON array of embeddings on stdout.

use crate::types::Embedding;
use image::{ImageFormat, RgbImage};
use std::io::{Cursor, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor could not be started: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("extractor i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("extractor output is not a JSON list of embeddings: {0}")]
    Output(#[from] serde_json::Error),
    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("malformed embedding: {0}")]
    Malformed(String),
    #[error("extractor killed after {0:?}")]
    TimedOut(Duration),
}

/// Turns an image into one embedding per detected face.
///
/// Implementations may block; callers run them off the async runtime.
pub trait EmbeddingExtractor: Send {
    /// Every detected face, in detection order. Empty when no face is found.
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError>;
}

/// Apply the single-face policy: keep the first detected face, ignore the rest.
///
/// Rejects embeddings that are empty, contain non-finite values, or whose
/// length disagrees with `expected_dim` when one is given.
pub fn first_face(
    faces: Vec<Embedding>,
    expected_dim: Option<usize>,
) -> Result<Option<Embedding>, ExtractError> {
    let total = faces.len();
    let Some(face) = faces.into_iter().next() else {
        return Ok(None);
    };

    if !face.is_well_formed() {
        return Err(ExtractError::Malformed(format!(
            "{} values, non-finite or empty",
            face.len()
        )));
    }
    if let Some(dim) = expected_dim {
        if face.len() != dim {
            return Err(ExtractError::Malformed(format!(
                "expected {dim}-dim embedding, got {}",
                face.len()
            )));
        }
    }
    if total > 1 {
        tracing::debug!(faces = total, "multiple faces detected; using the first");
    }

    Ok(Some(face))
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an external extractor program once per image.
///
/// With a deadline set, a child that outlives it is killed and reaped, so
/// one hung run never holds up the next image.
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    deadline: Option<Duration>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Split a shell-like command line on whitespace. Returns `None` if blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl EmbeddingExtractor for CommandExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;
        let png = png.into_inner();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExtractError::Spawn)?;

        // Pipes are serviced on their own threads so a child that stops
        // reading or floods stderr cannot stall the deadline check.
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&png)?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On timeout the pipe threads are left detached; they end once the
        // killed child's pipes close.
        let status = wait_with_deadline(&mut child, self.deadline)?;

        let stdout = join_pipe(stdout)?;
        let stderr = join_pipe(stderr)?;
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));

        if !status.success() {
            return Err(ExtractError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        written?;

        parse_embeddings(&stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_pipe(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, ExtractError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(std::io::Error::other("pipe reader panicked")))
        .map_err(ExtractError::Io)
}

/// Wait for the child, killing and reaping it once `deadline` has passed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Duration>,
) -> Result<ExitStatus, ExtractError> {
    let Some(limit) = deadline else {
        return Ok(child.wait()?);
    };
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= limit {
            if let Err(e) = child.kill() {
                tracing::warn!(error = %e, "failed to kill extractor");
            }
            let _ = child.wait();
            tracing::warn!(deadline = ?limit, "extractor exceeded its deadline; killed");
            return Err(ExtractError::TimedOut(limit));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Parse `[[f, f, ...], ...]` as emitted by extractor programs.
pub fn parse_embeddings(stdout: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
    let raw: Vec<Vec<f32>> = serde_json::from_slice(stdout)?;
    Ok(raw.into_iter().map(Embedding::new).collect())
}
