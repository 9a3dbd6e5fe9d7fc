//! Transcription port: live speech to incremental text

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

/// Event emitted by an open transcription session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionEvent {
    /// Best transcript so far; replaces any earlier partial
    Partial(String),
    /// Terminal: recognition finished with this text
    Final(String),
    /// Terminal: recognition failed
    Failed(String),
}

impl TranscriptionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial(_))
    }
}

/// Type alias for the boxed stream of transcription events
pub type TranscriptStream = Pin<Box<dyn Stream<Item = TranscriptionEvent> + Send>>;

/// Releases the resources behind a session (audio tap, recognizer task)
pub trait SessionControl: Send {
    fn close(&mut self);
}

impl<F: FnMut() + Send> SessionControl for F {
    fn close(&mut self) {
        self()
    }
}

/// One open recognition session
pub struct TranscriptionSession {
    events: Option<TranscriptStream>,
    control: Box<dyn SessionControl>,
    closed: bool,
}

impl TranscriptionSession {
    pub fn new(events: TranscriptStream, control: impl SessionControl + 'static) -> Self {
        Self {
            events: Some(events),
            control: Box::new(control),
            closed: false,
        }
    }

    /// Take the event stream; returns `None` after the first call
    pub fn take_events(&mut self) -> Option<TranscriptStream> {
        self.events.take()
    }

    /// Release the session; safe to call more than once
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.control.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Trait for transcription providers
pub trait TranscriptionProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Open a recognition session for the given locale
    ///
    /// Fails with [`Error::PortUnavailable`] when the microphone or
    /// recognizer cannot be used (e.g. permission denied).
    fn open(&self, locale: &str) -> Result<TranscriptionSession>;

    /// Check if the provider is configured and ready
    fn is_configured(&self) -> bool;
}

/// Sending half of a pushed transcript
#[derive(Debug, Clone)]
pub struct TranscriptFeed {
    tx: mpsc::UnboundedSender<TranscriptionEvent>,
}

impl TranscriptFeed {
    /// Push an event; returns false once the session is gone
    pub fn send(&self, event: TranscriptionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn partial(&self, text: impl Into<String>) -> bool {
        self.send(TranscriptionEvent::Partial(text.into()))
    }

    pub fn finish(&self, text: impl Into<String>) -> bool {
        self.send(TranscriptionEvent::Final(text.into()))
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.send(TranscriptionEvent::Failed(message.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a connected feed and event stream
pub fn transcript_channel() -> (TranscriptFeed, TranscriptStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });
    (TranscriptFeed { tx }, Box::pin(stream))
}

/// Provider for recognizers that deliver results through callbacks
///
/// Each `open` creates a fresh channel; the platform side pushes partial
/// and terminal results into [`FeedTranscriptionProvider::feed`].
pub struct FeedTranscriptionProvider {
    current: Arc<Mutex<Option<TranscriptFeed>>>,
    locale: Mutex<Option<String>>,
    available: AtomicBool,
}

impl FeedTranscriptionProvider {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(None)),
            locale: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Feed for the currently open session, if any
    pub fn feed(&self) -> Option<TranscriptFeed> {
        self.current.lock().clone()
    }

    /// Locale the last session was opened with
    pub fn last_locale(&self) -> Option<String> {
        self.locale.lock().clone()
    }

    /// Mark the microphone/recognizer as (un)available
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for FeedTranscriptionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionProvider for FeedTranscriptionProvider {
    fn name(&self) -> &'static str {
        "Feed"
    }

    fn open(&self, locale: &str) -> Result<TranscriptionSession> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::PortUnavailable(
                "Speech recognition is not available".to_string(),
            ));
        }

        let (feed, events) = transcript_channel();
        *self.current.lock() = Some(feed);
        *self.locale.lock() = Some(locale.to_string());
        debug!("Opened transcription session for {}", locale);

        let current = Arc::clone(&self.current);
        Ok(TranscriptionSession::new(events, move || {
            // dropping the sender ends the event stream
            current.lock().take();
        }))
    }

    fn is_configured(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
