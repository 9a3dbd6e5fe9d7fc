//! Genau - voice language tutoring core
//!
//! A learner speaks a sentence, the transcript goes to a coaching service,
//! and the reply, correction and scores come back together with XP. Progress
//! (XP, daily streak, the coach's memory) is kept in a local SQLite store.
//!
//! Transcription, speech output and coaching are ports; the
//! [`PracticeEngine`] drives one turn at a time through them.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod providers;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Re-export the main engine components for convenience
pub use config::{CoachConfig, PracticePreferences};
pub use coordinator::{CoordinatorReply, SessionCoordinator, UiCommand};
pub use engine::{EnginePorts, PracticeEngine, StopOutcome};
pub use events::{EngineEvent, EngineSnapshot};
pub use ledger::{
    Clock, FixedClock, GamificationLedger, LedgerSnapshot, LocalClock, StreakChange, StreakStatus,
};
pub use providers::{CoachingProvider, SpeechOutputProvider, TranscriptionProvider};
pub use storage::Storage;
