//! Practice session engine
//!
//! Drives one turn through `Idle -> Recording -> Submitting -> Responding -> Idle`,
//! with `Cancelled` as the abort path back to `Idle`.
//!
//! All state lives behind a single mutex. Transcription events and coaching
//! results arrive on spawned tasks and are applied under that mutex, tagged
//! with the turn id they belong to; anything tagged with an older turn is
//! dropped. A one-permit semaphore keeps at most one coaching call in flight,
//! including calls abandoned by `cancel`.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, error, info, warn};

use crate::config::PracticePreferences;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EngineSnapshot};
use crate::ledger::{Clock, GamificationLedger, LedgerSnapshot, LocalClock, StreakStatus};
use crate::providers::speech::{self, Playback};
use crate::providers::{
    CoachingProvider, CoachingRequest, SpeechOutputProvider, TranscriptStream,
    TranscriptionEvent, TranscriptionProvider, TranscriptionSession,
};
use crate::storage::Storage;
use crate::types::{
    CoachingResponse, LanguagePair, SessionTurn, Topic, TurnFeedback, TurnId, TurnRecord,
    TurnState,
};

const EVENT_CAPACITY: usize = 128;

/// External capabilities the engine drives
#[derive(Clone)]
pub struct EnginePorts {
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub coach: Arc<dyn CoachingProvider>,
    pub speech: Arc<dyn SpeechOutputProvider>,
}

/// Outcome of ending a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// Nothing was heard; back to idle without a coaching call
    Empty,
    /// The transcript was sent to the coach
    Submitted { turn_id: TurnId },
}

/// Handle to the practice session engine; clones share the same engine
#[derive(Clone)]
pub struct PracticeEngine {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    ports: EnginePorts,
    storage: Arc<Storage>,
    events: broadcast::Sender<EngineEvent>,
    submissions: Semaphore,
    runtime: Handle,
}

struct Inner {
    state: TurnState,
    turn_id: TurnId,
    turn: SessionTurn,
    session: Option<TranscriptionSession>,
    feedback: Option<TurnFeedback>,
    last_error: Option<String>,
    preferences: PracticePreferences,
    ledger: GamificationLedger,
}

impl PracticeEngine {
    /// Create an engine on the current Tokio runtime using the local clock
    pub fn new(storage: Arc<Storage>, ports: EnginePorts) -> Result<Self> {
        Self::with_clock(storage, ports, Arc::new(LocalClock))
    }

    /// Create an engine with a custom clock for streak bookkeeping
    ///
    /// Loads the ledger and preferences, and zeroes a lapsed streak right
    /// away so the first snapshot is never stale.
    pub fn with_clock(
        storage: Arc<Storage>,
        ports: EnginePorts,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("Practice engine needs a Tokio runtime: {e}")))?;

        let mut ledger = GamificationLedger::load_with_clock(Arc::clone(&storage), clock)?;
        if let StreakStatus::Broken { last_activity, .. } = ledger.reset_if_stale()? {
            info!("Streak reset at startup (last activity {})", last_activity);
        }

        if !ports.coach.is_configured() {
            warn!("Coaching provider {} is not configured", ports.coach.name());
        }

        let preferences = PracticePreferences::load(&storage)?;
        let turn = SessionTurn::new(
            preferences.languages.clone(),
            preferences.topic.clone(),
            ledger.memory(),
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Practice engine ready ({} -> {}, topic {}, transcription {}, coach {}, speech {})",
            preferences.languages.source(),
            preferences.languages.target(),
            preferences.topic,
            ports.transcription.name(),
            ports.coach.name(),
            ports.speech.name()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: TurnState::Idle,
                    turn_id: 0,
                    turn,
                    session: None,
                    feedback: None,
                    last_error: None,
                    preferences,
                    ledger,
                }),
                ports,
                storage,
                events,
                submissions: Semaphore::new(1),
                runtime,
            }),
        })
    }

    /// Subscribe to state-change events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    // ========== Turn commands ==========

    /// Begin recording a new turn
    ///
    /// Only valid in `Idle`; any ongoing reply playback is stopped. On
    /// failure to open the transcription port the engine stays idle.
    pub fn start_turn(&self) -> Result<TurnId> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if !inner.state.is_idle() {
            return Err(Error::InvalidState {
                operation: "start a turn",
                state: inner.state,
            });
        }

        shared.ports.speech.stop();

        let locale = inner.preferences.languages.source().to_string();
        let opened = if shared.ports.transcription.is_configured() {
            shared.ports.transcription.open(&locale)
        } else {
            Err(Error::PortUnavailable(format!(
                "{} transcription is not configured",
                shared.ports.transcription.name()
            )))
        };
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                let err = match e {
                    Error::PortUnavailable(_) => e,
                    other => Error::PortUnavailable(other.to_string()),
                };
                warn!("Could not open transcription for {}: {}", locale, err);
                inner.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        inner.turn_id += 1;
        let turn_id = inner.turn_id;
        inner.turn = SessionTurn::new(
            inner.preferences.languages.clone(),
            inner.preferences.topic.clone(),
            inner.ledger.memory(),
        );
        inner.feedback = None;
        inner.last_error = None;

        let events = session.take_events();
        inner.session = Some(session);
        shared.transition(&mut inner, TurnState::Recording);
        drop(inner);

        if let Some(events) = events {
            let task_shared = Arc::clone(shared);
            shared
                .runtime
                .spawn(task_shared.forward_transcript(turn_id, events));
        }

        info!(turn_id, "Recording started ({})", locale);
        Ok(turn_id)
    }

    /// End recording and submit the transcript
    ///
    /// Only valid in `Recording`. An empty transcript returns to `Idle`
    /// without contacting the coach.
    pub fn stop_turn(&self) -> Result<StopOutcome> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TurnState::Recording {
            return Err(Error::InvalidState {
                operation: "stop a turn",
                state: inner.state,
            });
        }
        Ok(self.shared.finish_recording(&mut inner))
    }

    /// Abort the current turn
    ///
    /// In `Recording` the transcription session is discarded. In
    /// `Submitting` the coaching call keeps running but its result is
    /// dropped when it arrives.
    pub fn cancel(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        match inner.state {
            TurnState::Recording => {
                if let Some(mut session) = inner.session.take() {
                    session.close();
                }
            }
            TurnState::Submitting => {
                debug!(turn_id = inner.turn_id, "Abandoning in-flight coaching call");
            }
            state => {
                return Err(Error::InvalidState {
                    operation: "cancel",
                    state,
                });
            }
        }

        shared.transition(&mut inner, TurnState::Cancelled);
        shared.transition(&mut inner, TurnState::Idle);
        info!(turn_id = inner.turn_id, "Turn cancelled");
        Ok(())
    }

    // ========== Session settings ==========

    /// Swap source and target language; only valid in `Idle`
    pub fn swap_languages(&self) -> Result<LanguagePair> {
        let mut inner = self.shared.inner.lock();
        ensure_idle(&inner, "swap languages")?;

        let mut preferences = inner.preferences.clone();
        preferences.languages.swap();
        preferences.save(&self.shared.storage)?;

        inner.turn.languages = preferences.languages.clone();
        inner.preferences = preferences;
        info!(
            "Languages swapped: {} -> {}",
            inner.preferences.languages.source(),
            inner.preferences.languages.target()
        );
        Ok(inner.preferences.languages.clone())
    }

    /// Choose the conversation topic; only valid in `Idle`
    pub fn set_topic(&self, topic: Topic) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        ensure_idle(&inner, "change topic")?;

        let mut preferences = inner.preferences.clone();
        preferences.topic = topic;
        preferences.save(&self.shared.storage)?;

        inner.turn.topic = preferences.topic.clone();
        inner.preferences = preferences;
        debug!("Topic set to {}", inner.preferences.topic);
        Ok(())
    }

    /// Re-run the streak staleness check, e.g. when the app resumes on a
    /// new day
    pub fn refresh_streak(&self) -> Result<StreakStatus> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let before = inner.ledger.streak_days();
        let status = inner.ledger.reset_if_stale()?;

        if let StreakStatus::Broken { last_activity, .. } = status
            && before != inner.ledger.streak_days()
        {
            shared.emit(EngineEvent::StreakReset { last_activity });
            shared.emit(EngineEvent::LedgerUpdated {
                ledger: inner.ledger.snapshot(),
            });
        }
        Ok(status)
    }

    /// Drop the operator-visible error indicator
    pub fn clear_error(&self) {
        self.shared.inner.lock().last_error = None;
    }

    // ========== Observation ==========

    pub fn state(&self) -> TurnState {
        self.shared.inner.lock().state
    }

    pub fn turn_id(&self) -> TurnId {
        self.shared.inner.lock().turn_id
    }

    pub fn transcript(&self) -> String {
        self.shared.inner.lock().turn.transcript.clone()
    }

    pub fn feedback(&self) -> Option<TurnFeedback> {
        self.shared.inner.lock().feedback.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.inner.lock().last_error.clone()
    }

    pub fn languages(&self) -> LanguagePair {
        self.shared.inner.lock().preferences.languages.clone()
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        self.shared.inner.lock().ledger.snapshot()
    }

    /// Memory context the next turn will send
    pub fn memory(&self) -> String {
        self.shared.inner.lock().ledger.memory().to_string()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let inner = self.shared.inner.lock();
        EngineSnapshot {
            state: inner.state,
            turn_id: inner.turn_id,
            transcript: inner.turn.transcript.clone(),
            feedback: inner.feedback.clone(),
            last_error: inner.last_error.clone(),
            languages: inner.preferences.languages.clone(),
            topic: inner.preferences.topic.clone(),
            ledger: inner.ledger.snapshot(),
        }
    }

    /// Most recent completed turns, newest first
    pub fn recent_turns(&self, limit: usize) -> Result<Vec<TurnRecord>> {
        self.shared.storage.get_recent_turns(limit)
    }
}

fn ensure_idle(inner: &Inner, operation: &'static str) -> Result<()> {
    if inner.state.is_idle() {
        Ok(())
    } else {
        Err(Error::InvalidState {
            operation,
            state: inner.state,
        })
    }
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, inner: &mut Inner, to: TurnState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(turn_id = inner.turn_id, "State {} -> {}", from, to);
        self.emit(EngineEvent::StateChanged {
            turn_id: inner.turn_id,
            from,
            to,
        });
    }

    fn is_current(&self, turn_id: TurnId, state: TurnState) -> bool {
        let inner = self.inner.lock();
        inner.turn_id == turn_id && inner.state == state
    }

    /// Apply transcription events for `turn_id` until a terminal event or
    /// until the turn is no longer recording
    async fn forward_transcript(self: Arc<Self>, turn_id: TurnId, mut events: TranscriptStream) {
        while let Some(event) = events.next().await {
            let mut inner = self.inner.lock();
            if inner.turn_id != turn_id || inner.state != TurnState::Recording {
                debug!(turn_id, "Ignoring transcription event for finished turn");
                return;
            }

            let terminal = event.is_terminal();
            match event {
                TranscriptionEvent::Partial(text) | TranscriptionEvent::Final(text) => {
                    self.update_transcript(&mut inner, text);
                }
                TranscriptionEvent::Failed(message) => {
                    warn!(turn_id, "Transcription ended with error: {}", message);
                    if !inner.turn.has_speech() {
                        inner.last_error = Some(format!("Transcription failed: {message}"));
                    }
                }
            }

            if terminal {
                self.finish_recording(&mut inner);
                return;
            }
        }
        debug!(turn_id, "Transcription stream closed");
    }

    fn update_transcript(&self, inner: &mut Inner, text: String) {
        if inner.turn.transcript == text {
            return;
        }
        inner.turn.transcript = text;
        self.emit(EngineEvent::TranscriptUpdated {
            turn_id: inner.turn_id,
            transcript: inner.turn.transcript.clone(),
        });
    }

    /// Close the transcription session and either submit or go idle
    fn finish_recording(self: &Arc<Self>, inner: &mut Inner) -> StopOutcome {
        if let Some(mut session) = inner.session.take() {
            session.close();
        }

        let turn_id = inner.turn_id;
        if !inner.turn.has_speech() {
            debug!(turn_id, "Nothing heard, skipping submission");
            self.transition(inner, TurnState::Idle);
            return StopOutcome::Empty;
        }

        self.transition(inner, TurnState::Submitting);
        let request = CoachingRequest::from_turn(&inner.turn, inner.ledger.streak_days());

        let task = self.runtime.spawn(Arc::clone(self).submit(turn_id, request));
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                shared.submission_died(turn_id, e);
            }
        });
        StopOutcome::Submitted { turn_id }
    }

    /// Return to idle when the submission task panicked or was aborted
    /// before it could settle the turn
    fn submission_died(&self, turn_id: TurnId, err: JoinError) {
        let mut inner = self.inner.lock();
        let unsettled = matches!(inner.state, TurnState::Submitting | TurnState::Responding);
        if inner.turn_id != turn_id || !unsettled {
            debug!(turn_id, "Submission task ended after the turn moved on: {}", err);
            return;
        }
        self.fail_turn(
            &mut inner,
            Error::CoachingService(format!("Coaching task failed: {err}")),
        );
    }

    async fn submit(self: Arc<Self>, turn_id: TurnId, request: CoachingRequest) {
        // waits for any abandoned call from a cancelled turn to finish
        let Ok(_permit) = self.submissions.acquire().await else {
            return;
        };

        if !self.is_current(turn_id, TurnState::Submitting) {
            debug!(turn_id, "Turn cancelled before submission");
            return;
        }

        if !self.ports.coach.is_configured() {
            let err = Error::CoachingService(format!(
                "{} coach is not configured",
                self.ports.coach.name()
            ));
            let mut inner = self.inner.lock();
            if inner.turn_id == turn_id && inner.state == TurnState::Submitting {
                self.fail_turn(&mut inner, err);
            }
            return;
        }

        info!(
            turn_id,
            "Submitting transcript to {} ({} -> {})",
            self.ports.coach.name(),
            request.source_lang,
            request.target_lang
        );
        let result = self.ports.coach.coach(request).await;

        let mut inner = self.inner.lock();
        if inner.turn_id != turn_id || inner.state != TurnState::Submitting {
            debug!(turn_id, "Discarding stale coaching result");
            return;
        }

        match result {
            Ok(response) => self.apply_response(&mut inner, response),
            Err(e) => self.fail_turn(&mut inner, e),
        }
    }

    fn apply_response(&self, inner: &mut Inner, response: CoachingResponse) {
        let turn_id = inner.turn_id;
        self.transition(inner, TurnState::Responding);

        let feedback = TurnFeedback::from(&response);
        inner.feedback = Some(feedback.clone());

        if let Some(memory) = response.updated_memory.as_deref()
            && let Err(e) = inner.ledger.remember(memory)
        {
            error!(turn_id, "Failed to persist memory: {}", e);
        }

        match inner.ledger.record_activity(response.xp_delta) {
            Ok(_) => self.emit(EngineEvent::LedgerUpdated {
                ledger: inner.ledger.snapshot(),
            }),
            Err(e) => {
                error!(turn_id, "Failed to persist progress: {}", e);
                inner.last_error = Some(format!("Could not save progress: {e}"));
            }
        }

        let record = TurnRecord::new(&inner.turn, &response);
        if let Err(e) = self.storage.save_turn(&record) {
            warn!(turn_id, "Failed to save turn history: {}", e);
        }

        info!(
            turn_id,
            score = response.scores.total,
            xp = response.xp_delta,
            "Coaching response applied"
        );
        self.emit(EngineEvent::FeedbackReady { turn_id, feedback });

        let locale = inner.turn.languages.target().to_string();
        if let Some(playback) = Playback::select(&response, &locale) {
            speech::play(
                self.ports.speech.as_ref(),
                playback,
                &response.reply_text,
                &locale,
            );
        }

        self.transition(inner, TurnState::Idle);
    }

    fn fail_turn(&self, inner: &mut Inner, err: Error) {
        let turn_id = inner.turn_id;
        let message = if err.is_coaching_failure() {
            err.to_string()
        } else {
            Error::CoachingService(err.to_string()).to_string()
        };

        error!(turn_id, "Coaching call failed: {}", message);
        inner.last_error = Some(message.clone());
        self.emit(EngineEvent::TurnFailed { turn_id, message });
        self.transition(inner, TurnState::Idle);
    }
}
