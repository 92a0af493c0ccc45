use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::detect::backend::{ClassifierOptions, GestureClassifier};
use crate::detect::result::Recognition;
use crate::frame::FRAME_CHANNELS;
use crate::session::StopHandle;

const READY_LINE: &str = "READY";
const WAIT_SLICE: Duration = Duration::from_millis(20);
const FRAME_HEADER_LEN: usize = 20;

/// One reply line from the helper process.
#[derive(Deserialize)]
struct Reply {
    #[serde(flatten)]
    recognition: Recognition,
    #[serde(default)]
    error: Option<String>,
}

/// Classifier hosted in an external helper process (e.g. a MediaPipe script).
///
/// Protocol over the child's stdio:
/// 1. The child prints `READY` once its model is loaded.
/// 2. Per frame we write `timestamp_ms: u64`, `width: u32`, `height: u32`,
///    `channels: u32` (all little-endian) followed by the packed pixels.
/// 3. The child answers with one JSON line: a recognition object, or
///    `{"error": "..."}` for a per-frame failure.
///
/// Pipe I/O runs on two helper threads so that every wait is bounded by
/// `ready_timeout`/`reply_timeout` and by the stop handle. A helper that
/// misses a deadline is killed.
pub struct ProcessClassifier {
    child: Child,
    frames: Option<SyncSender<Vec<u8>>>,
    lines: Receiver<io::Result<String>>,
    program: String,
    reply_timeout: Duration,
    stop: StopHandle,
    closed: bool,
}

impl ProcessClassifier {
    /// Spawn the helper and wait for its ready signal.
    ///
    /// The model path and options are appended to `command` as
    /// `--model <path> --num-hands <n> --running-mode <mode> --delegate <d>`.
    /// Waiting gives up early once `stop` is set.
    pub fn spawn(
        command: &[String],
        model_asset: &Path,
        options: &ClassifierOptions,
        stop: &StopHandle,
    ) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("classifier command is empty"))?;

        log::info!("starting classifier process {}", program);
        let mut child = Command::new(program)
            .args(args)
            .arg("--model")
            .arg(model_asset)
            .arg("--num-hands")
            .arg(options.num_hands.to_string())
            .arg("--running-mode")
            .arg(options.running_mode.as_str())
            .arg("--delegate")
            .arg(options.delegate.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start classifier process {}", program))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("classifier process {} has no stdio pipes", program);
            }
        };

        let pipes = spawn_reader(stdout).and_then(|lines| Ok((lines, spawn_writer(stdin)?)));
        let (lines, frames) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let mut classifier = Self {
            child,
            frames: Some(frames),
            lines,
            program: program.clone(),
            reply_timeout: options.reply_timeout,
            stop: stop.clone(),
            closed: false,
        };
        if let Err(e) = classifier.await_ready(options.ready_timeout) {
            classifier.close();
            return Err(e);
        }
        log::info!("classifier process {} ready", classifier.program);
        Ok(classifier)
    }

    fn await_ready(&mut self, timeout: Duration) -> Result<()> {
        let line = self
            .next_line(timeout)
            .context("wait for classifier ready signal")?;
        if line.trim() != READY_LINE {
            bail!(
                "classifier process {} did not signal ready, got: {}",
                self.program,
                line.trim()
            );
        }
        Ok(())
    }

    /// Next stdout line, bounded by `timeout` and the stop handle.
    fn next_line(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stop.is_stopped() {
                bail!("classifier process {} abandoned: stopping", self.program);
            }
            let now = Instant::now();
            if now >= deadline {
                self.close();
                bail!(
                    "classifier process {} did not answer within {:?}; killed",
                    self.program,
                    timeout
                );
            }
            match self.lines.recv_timeout(WAIT_SLICE.min(deadline - now)) {
                Ok(Ok(line)) => return Ok(line),
                Ok(Err(e)) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("read from classifier process {}", self.program)))
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("classifier process {} closed its output", self.program)
                }
            }
        }
    }

    fn send_frame(&mut self, pixels: &[u8], width: u32, height: u32, timestamp_ms: u64) -> Result<()> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| anyhow!("classifier process {} is closed", self.program))?;
        let mut message = Vec::with_capacity(FRAME_HEADER_LEN + pixels.len());
        message.extend_from_slice(&timestamp_ms.to_le_bytes());
        message.extend_from_slice(&width.to_le_bytes());
        message.extend_from_slice(&height.to_le_bytes());
        message.extend_from_slice(&FRAME_CHANNELS.to_le_bytes());
        message.extend_from_slice(pixels);
        match frames.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(mut message)) => {
                message.zeroize();
                bail!("classifier process {} is still busy with a frame", self.program)
            }
            Err(TrySendError::Disconnected(mut message)) => {
                message.zeroize();
                bail!("classifier process {} stopped reading frames", self.program)
            }
        }
    }
}

fn spawn_reader(stdout: ChildStdout) -> Result<Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("classifier-stdout".to_string())
        .spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })
        .context("spawn classifier reader thread")?;
    Ok(rx)
}

fn spawn_writer(mut stdin: ChildStdin) -> Result<SyncSender<Vec<u8>>> {
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(1);
    std::thread::Builder::new()
        .name("classifier-stdin".to_string())
        .spawn(move || {
            for mut message in rx {
                let written = stdin.write_all(&message).and_then(|_| stdin.flush());
                message.zeroize();
                if let Err(e) = written {
                    log::debug!("classifier stdin closed: {}", e);
                    break;
                }
            }
        })
        .context("spawn classifier writer thread")?;
    Ok(tx)
}

impl GestureClassifier for ProcessClassifier {
    fn name(&self) -> &'static str {
        "process"
    }

    fn recognize(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: u64,
    ) -> Result<Recognition> {
        if self.closed {
            bail!("classifier process {} is closed", self.program);
        }
        self.send_frame(pixels, width, height, timestamp_ms)
            .with_context(|| format!("send frame to classifier process {}", self.program))?;

        let timeout = self.reply_timeout;
        let line = self.next_line(timeout).context("read classifier reply")?;
        let reply: Reply = serde_json::from_str(line.trim())
            .with_context(|| format!("invalid classifier reply: {}", line.trim()))?;
        if let Some(error) = reply.error {
            bail!("classifier error: {}", error);
        }
        Ok(reply.recognition)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.frames = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
        log::info!("classifier process {} stopped", self.program);
    }
}

impl Drop for ProcessClassifier {
    fn drop(&mut self) {
        self.close();
    }
}
