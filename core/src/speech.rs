//! Capability interfaces for speech capture and synthesis.
//!
//! Each collaborator call yields a [`Session`]: exactly one outcome delivered
//! through a oneshot channel, plus a cancel signal the orchestrator can fire.
//! Implementations hold the matching [`SessionControl`].

use tokio::sync::oneshot;

use crate::errors::SpeechError;
use crate::persona::PersonaId;

pub struct Session<T> {
    outcome: oneshot::Receiver<Result<T, SpeechError>>,
    cancel: Option<oneshot::Sender<()>>,
}

pub struct SessionControl<T> {
    outcome: oneshot::Sender<Result<T, SpeechError>>,
    // None once the cancel signal has been observed.
    cancelled: Option<oneshot::Receiver<()>>,
}

/// Create a linked session pair.
pub fn session<T>() -> (Session<T>, SessionControl<T>) {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        Session {
            outcome: outcome_rx,
            cancel: Some(cancel_tx),
        },
        SessionControl {
            outcome: outcome_tx,
            cancelled: Some(cancel_rx),
        },
    )
}

impl<T> Session<T> {
    /// Split into the outcome receiver and a cancel handle.
    pub fn into_parts(mut self) -> (oneshot::Receiver<Result<T, SpeechError>>, CancelHandle) {
        let cancel = CancelHandle(self.cancel.take());
        (self.outcome, cancel)
    }
}

/// Fires the cancel signal at most once.
pub struct CancelHandle(Option<oneshot::Sender<()>>);

impl CancelHandle {
    pub fn cancel(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl<T> SessionControl<T> {
    /// Deliver the single outcome. Consumes the control so a second outcome is
    /// impossible.
    pub fn finish(self, outcome: Result<T, SpeechError>) {
        let _ = self.outcome.send(outcome);
    }

    /// True once the orchestrator has cancelled, or dropped, the session.
    pub fn is_cancelled(&mut self) -> bool {
        let Some(rx) = self.cancelled.as_mut() else {
            return true;
        };
        if matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return false;
        }
        self.cancelled = None;
        true
    }

    /// Wait for cancellation.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.cancelled.take() {
            let _ = rx.await;
        }
    }
}

pub trait SpeechCapture: Send + Sync {
    /// Begin a capture session yielding one final transcript or one error.
    /// Returns [`SpeechError::Unsupported`] when no recognizer exists.
    fn start_listening(&self) -> Result<Session<String>, SpeechError>;
}

pub trait SpeechSynthesis: Send + Sync {
    /// Vocalize `text`. Cancellation resolves `Ok`, not an error.
    fn speak(&self, text: &str, persona: &PersonaId) -> Session<()>;
}

/// First available voice whose name contains one of `hints`, trying hints in
/// preference order.
pub fn select_voice<'a>(available: &'a [String], hints: &[String]) -> Option<&'a str> {
    hints.iter().find_map(|hint| {
        available
            .iter()
            .find(|voice| voice.contains(hint.as_str()))
            .map(|voice| voice.as_str())
    })
}

/// Capture collaborator for environments without a recognizer.
pub struct NoCapture;

impl SpeechCapture for NoCapture {
    fn start_listening(&self) -> Result<Session<String>, SpeechError> {
        Err(SpeechError::Unsupported)
    }
}
