use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::shared::constants::{DEFAULT_FFMPEG_PROGRAM, DEFAULT_JPEG_QUALITY, DEFAULT_TARGET_FPS};
use crate::stream::decoder_process::{
    DecoderEvent, DecoderEventSender, DecoderHandle, DecoderLauncher, ExitReport, Generation,
    LaunchError, ProcessEvent,
};
use crate::stream::diagnostics::LineSplitter;

const STDOUT_CHUNK_SIZE: usize = 64 * 1024;

/// How long pipe readers may keep draining after the process exits.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Placeholder in [`DecoderCommand::args`] replaced by the stream URL.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Program and argument template for the decoder subprocess.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DecoderCommand {
    /// ffmpeg emitting MJPEG at a fixed frame rate on stdout.
    pub fn ffmpeg(program: impl Into<String>, fps: u32, jpeg_quality: u32) -> Self {
        let args = [
            "-nostdin",
            "-i",
            SOURCE_PLACEHOLDER,
            "-an",
            "-vf",
            &format!("fps={fps}"),
            "-f",
            "image2pipe",
            "-pix_fmt",
            "yuvj420p",
            "-vcodec",
            "mjpeg",
            "-q:v",
            &jpeg_quality.to_string(),
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn render_args(&self, source: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(SOURCE_PLACEHOLDER, source))
            .collect()
    }
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self::ffmpeg(DEFAULT_FFMPEG_PROGRAM, DEFAULT_TARGET_FPS, DEFAULT_JPEG_QUALITY)
    }
}

/// Spawns decoder subprocesses and pumps their pipes into session events.
#[derive(Clone, Debug, Default)]
pub struct FfmpegLauncher {
    command: DecoderCommand,
}

impl FfmpegLauncher {
    pub fn new(command: DecoderCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &DecoderCommand {
        &self.command
    }
}

impl DecoderLauncher for FfmpegLauncher {
    fn launch(
        &self,
        source: &str,
        generation: Generation,
        events: DecoderEventSender,
    ) -> Result<DecoderHandle, LaunchError> {
        if source.trim().is_empty() {
            return Err(LaunchError::EmptySource);
        }

        let mut child = Command::new(&self.command.program)
            .args(self.command.render_args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;
        let pid = child.id();
        log::info!(
            "Started decoder generation {generation} (pid {}) for {source}",
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );

        let (handle, kill_rx) = DecoderHandle::new(generation, pid);
        let pumps = [
            tokio::spawn(pump_stdout(stdout, generation, events.clone())),
            tokio::spawn(pump_stderr(stderr, generation, events.clone())),
        ];
        tokio::spawn(supervise(child, kill_rx, pumps, generation, events));

        Ok(handle)
    }
}

fn send(events: &DecoderEventSender, generation: Generation, event: ProcessEvent) -> bool {
    events.send(DecoderEvent { generation, event }).is_ok()
}

async fn pump_stdout<R>(mut stdout: R, generation: Generation, events: DecoderEventSender)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; STDOUT_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !send(&events, generation, ProcessEvent::Output(buf[..n].to_vec())) {
                    break;
                }
            }
            Err(e) => {
                send(&events, generation, ProcessEvent::Fault(format!("stdout: {e}")));
                break;
            }
        }
    }
}

async fn pump_stderr<R>(mut stderr: R, generation: Generation, events: DecoderEventSender)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 4096];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if !send(&events, generation, ProcessEvent::Diagnostic(line)) {
                        return;
                    }
                }
            }
            Err(e) => {
                send(&events, generation, ProcessEvent::Fault(format!("stderr: {e}")));
                return;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        send(&events, generation, ProcessEvent::Diagnostic(line));
    }
}

/// Waits for exit or a kill request, lets the pipes drain, then reports
/// exactly one `Exited`.
async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    mut pumps: [JoinHandle<()>; 2],
    generation: Generation,
    events: DecoderEventSender,
) {
    let mut killed = false;
    // A dropped handle resolves `kill_rx` with an error; that also means stop.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            killed = true;
            if let Err(e) = child.start_kill() {
                log::debug!("Decoder generation {generation} already gone: {e}");
            }
            child.wait().await
        }
    };

    let [out, err] = &mut pumps;
    let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
        let _ = out.await;
        let _ = err.await;
    })
    .await;
    if drained.is_err() {
        log::debug!("Decoder generation {generation} pipes still open after exit, detaching");
        for pump in &pumps {
            pump.abort();
        }
    }

    let report = match status {
        Ok(status) => ExitReport {
            code: status.code(),
            signal: exit_signal(&status),
            killed,
        },
        Err(e) => {
            send(&events, generation, ProcessEvent::Fault(format!("wait: {e}")));
            ExitReport {
                code: None,
                signal: None,
                killed,
            }
        }
    };
    log::info!("Decoder generation {generation} exited: {report}");
    send(&events, generation, ProcessEvent::Exited(report));
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
