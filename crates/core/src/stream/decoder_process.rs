use std::fmt;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Distinguishes successive decoder instances within one session.
pub type Generation = u64;

/// How the decoder process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    /// Terminating signal on unix, if any.
    pub signal: Option<i32>,
    /// True when the exit followed our own kill request.
    pub killed: bool,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}")?,
            (None, Some(sig)) => write!(f, "signal {sig}")?,
            (None, None) => write!(f, "unknown status")?,
        }
        if self.killed {
            write!(f, " (killed)")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ProcessEvent {
    /// Raw bytes from the image pipe.
    Output(Vec<u8>),
    /// One line of diagnostic text.
    Diagnostic(String),
    /// Runtime failure (pipe read error, wait failure).
    Fault(String),
    Exited(ExitReport),
}

/// A [`ProcessEvent`] tagged with the decoder instance that produced it.
#[derive(Debug)]
pub struct DecoderEvent {
    pub generation: Generation,
    pub event: ProcessEvent,
}

pub type DecoderEventSender = mpsc::UnboundedSender<DecoderEvent>;
pub type DecoderEventReceiver = mpsc::UnboundedReceiver<DecoderEvent>;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to start decoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoder started without a {0} pipe")]
    MissingPipe(&'static str),
    #[error("stream source is empty")]
    EmptySource,
}

/// Starts decoder processes for a session.
///
/// Implementations forward every event of the new process, tagged with
/// `generation`, to `events`, ending with exactly one `Exited`.
pub trait DecoderLauncher: Send + Sync {
    fn launch(
        &self,
        source: &str,
        generation: Generation,
        events: DecoderEventSender,
    ) -> Result<DecoderHandle, LaunchError>;
}

/// Owned lifetime of one decoder process.
///
/// `kill` only signals; the exit arrives later as `ProcessEvent::Exited`.
/// Killing twice, or after the process already exited, is harmless.
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct DecoderHandle {
    generation: Generation,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl DecoderHandle {
    /// Returns the handle and the receiver the process supervisor watches.
    pub fn new(generation: Generation, pid: Option<u32>) -> (Self, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        (
            Self {
                generation,
                pid,
                kill_tx: Some(kill_tx),
            },
            kill_rx,
        )
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            log::debug!("Signalling decoder generation {} to stop", self.generation);
            let _ = tx.send(());
        }
    }

    pub fn is_killed(&self) -> bool {
        self.kill_tx.is_none()
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.kill();
    }
}
