//! Core types used throughout Genau

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonically increasing identifier of a practice turn
pub type TurnId = u64;

/// Unique identifier for persisted turn records
pub type TurnRecordId = Uuid;

/// State of the practice session engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    /// Transcription port is open, transcript accumulates
    Recording,
    /// One coaching call is in flight for the current turn
    Submitting,
    /// Coaching response is being applied
    Responding,
    /// Turn was aborted; the engine passes through here on its way back to idle
    Cancelled,
}

impl TurnState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Submitting => "submitting",
            Self::Responding => "responding",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Source/target language tags (BCP-47, e.g. "de-DE")
///
/// The two tags only ever change together through [`LanguagePair::swap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    source: String,
    target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Language the learner speaks into the microphone
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Language the coach replies in
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.source, &mut self.target);
    }
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self::new("de-DE", "en-US")
    }
}

/// Conversation topic sent to the coaching service
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Topic {
    #[default]
    DailyLife,
    Shopping,
    JobInterview,
    FreeConversation,
    Custom(String),
}

impl Topic {
    /// Label understood by the coaching service
    pub fn label(&self) -> &str {
        match self {
            Self::DailyLife => "Daily Life",
            Self::Shopping => "Shopping",
            Self::JobInterview => "Job Interview",
            Self::FreeConversation => "Free Conversation",
            Self::Custom(label) => label,
        }
    }

    /// Built-in topics
    pub fn all() -> &'static [Topic] {
        &[
            Topic::DailyLife,
            Topic::Shopping,
            Topic::JobInterview,
            Topic::FreeConversation,
        ]
    }

    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        Self::all()
            .iter()
            .find(|t| t.label().eq_ignore_ascii_case(trimmed))
            .cloned()
            .unwrap_or_else(|| Self::Custom(trimmed.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.label().to_string()
    }
}

impl From<String> for Topic {
    fn from(label: String) -> Self {
        Topic::parse(&label)
    }
}

/// One record/submit/respond cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Latest recognized speech; replaced, never appended
    pub transcript: String,
    pub languages: LanguagePair,
    pub topic: Topic,
    /// Opaque conversational memory, round-tripped verbatim
    pub memory_context: String,
}

impl SessionTurn {
    pub fn new(languages: LanguagePair, topic: Topic, memory_context: impl Into<String>) -> Self {
        Self {
            transcript: String::new(),
            languages,
            topic,
            memory_context: memory_context.into(),
        }
    }

    pub fn has_speech(&self) -> bool {
        !self.transcript.trim().is_empty()
    }
}

/// Scores as received from the coaching service
///
/// Values are semantically 0-100 but stored exactly as received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub total: i64,
    pub grammar: i64,
    pub pronunciation: i64,
}

impl Scores {
    pub fn display_total(&self) -> u8 {
        clamp_score(self.total)
    }

    pub fn display_grammar(&self) -> u8 {
        clamp_score(self.grammar)
    }

    pub fn display_pronunciation(&self) -> u8 {
        clamp_score(self.pronunciation)
    }
}

fn clamp_score(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Result of one coaching service call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingResponse {
    pub reply_text: String,
    pub correction_text: Option<String>,
    pub pronunciation_tip: Option<String>,
    pub scores: Scores,
    /// Amount added to the ledger; absent deltas arrive as zero
    pub xp_delta: i64,
    /// Replaces the memory context for the next turn when present
    pub updated_memory: Option<String>,
    pub audio_url: Option<String>,
    /// Base64-encoded inline audio clip
    pub audio_base64: Option<String>,
    pub should_repeat: bool,
}

/// What the learner sees after a turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFeedback {
    pub reply: String,
    pub correction: Option<String>,
    pub pronunciation_tip: Option<String>,
    pub scores: Scores,
    pub should_repeat: bool,
    pub xp_awarded: i64,
}

impl From<&CoachingResponse> for TurnFeedback {
    fn from(response: &CoachingResponse) -> Self {
        Self {
            reply: response.reply_text.clone(),
            correction: response.correction_text.clone(),
            pronunciation_tip: response.pronunciation_tip.clone(),
            scores: response.scores,
            should_repeat: response.should_repeat,
            xp_awarded: response.xp_delta,
        }
    }
}

/// A completed turn kept in the practice history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: TurnRecordId,
    pub transcript: String,
    pub reply: String,
    pub correction: Option<String>,
    pub scores: Scores,
    pub xp_awarded: i64,
    pub languages: LanguagePair,
    pub topic: Topic,
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(turn: &SessionTurn, response: &CoachingResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript: turn.transcript.clone(),
            reply: response.reply_text.clone(),
            correction: response.correction_text.clone(),
            scores: response.scores,
            xp_awarded: response.xp_delta,
            languages: turn.languages.clone(),
            topic: turn.topic.clone(),
            created_at: Utc::now(),
        }
    }
}

/// One row of the remote leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub location: String,
    pub top_score: i64,
}
