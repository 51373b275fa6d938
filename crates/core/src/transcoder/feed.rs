//! The consumer side of a run: progress events plus the run's error log.

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::error::TranscoderError;
use super::types::Progress;

/// Capacity of the progress channel. Kept at one so the reader stays in
/// lockstep with the consumer.
pub(crate) const PROGRESS_BUFFER: usize = 1;

/// Error messages accumulated during a single run.
///
/// Written by the progress reader (error lines) and the process supervisor
/// (exit status); cloning shares the same log.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.into());
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Aggregates the log into a single error, or `None` if nothing was logged.
    pub fn to_error(&self) -> Option<TranscoderError> {
        let messages = self.messages();
        if messages.is_empty() {
            None
        } else {
            Some(TranscoderError::runtime(messages))
        }
    }
}

/// Progress events of a running transcode.
///
/// The feed ends once ffmpeg has exited and every error has been recorded,
/// so [`ProgressFeed::error`] is final after the feed returns `None`.
/// Events are only produced as fast as they are consumed.
#[derive(Debug)]
pub struct ProgressFeed {
    rx: mpsc::Receiver<Progress>,
    errors: ErrorLog,
}

impl ProgressFeed {
    pub(crate) fn new(rx: mpsc::Receiver<Progress>, errors: ErrorLog) -> Self {
        Self { rx, errors }
    }

    /// Waits for the next progress event; `None` once the run has finished.
    pub async fn recv(&mut self) -> Option<Progress> {
        self.rx.recv().await
    }

    /// The aggregated error of the run so far.
    pub fn error(&self) -> Option<TranscoderError> {
        self.errors.to_error()
    }

    /// Discards remaining events and returns the run's final outcome.
    pub async fn finish(mut self) -> Result<(), TranscoderError> {
        while self.rx.recv().await.is_some() {}
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Stream for ProgressFeed {
    type Item = Progress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
