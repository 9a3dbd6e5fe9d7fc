//! Typed events and snapshots published by the practice engine

use chrono::NaiveDate;
use serde::Serialize;

use crate::ledger::LedgerSnapshot;
use crate::types::{LanguagePair, Topic, TurnFeedback, TurnId, TurnState};

/// Change notification delivered to engine subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        turn_id: TurnId,
        from: TurnState,
        to: TurnState,
    },
    TranscriptUpdated {
        turn_id: TurnId,
        transcript: String,
    },
    FeedbackReady {
        turn_id: TurnId,
        feedback: TurnFeedback,
    },
    LedgerUpdated {
        ledger: LedgerSnapshot,
    },
    /// Operator-visible failure; the engine is back in idle
    TurnFailed {
        turn_id: TurnId,
        message: String,
    },
    StreakReset {
        last_activity: NaiveDate,
    },
}

/// Everything a view needs to render the practice screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub state: TurnState,
    pub turn_id: TurnId,
    pub transcript: String,
    pub feedback: Option<TurnFeedback>,
    pub last_error: Option<String>,
    pub languages: LanguagePair,
    pub topic: Topic,
    pub ledger: LedgerSnapshot,
}
