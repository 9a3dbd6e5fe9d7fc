//! Coaching provider trait and wire types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{CoachingResponse, Scores, SessionTurn};

/// Request body sent to the coaching service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingRequest {
    pub transcript: String,
    pub source_lang: String,
    pub target_lang: String,
    pub topic: String,
    pub memory: String,
    pub streak: u32,
}

impl CoachingRequest {
    /// Build the request for a finished recording
    pub fn from_turn(turn: &SessionTurn, streak: u32) -> Self {
        Self {
            transcript: turn.transcript.trim().to_string(),
            source_lang: turn.languages.source().to_string(),
            target_lang: turn.languages.target().to_string(),
            topic: turn.topic.label().to_string(),
            memory: turn.memory_context.clone(),
            streak,
        }
    }
}

/// Response body as sent by the coaching service
///
/// Every field is optional on the wire. Missing numbers become 0 and
/// missing strings become empty. `memory` is passed through as-is: an
/// absent value keeps the stored memory, an empty string clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoachingPayload {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub correction: Option<String>,
    #[serde(default)]
    pub pronunciation_tip: Option<String>,
    #[serde(default)]
    pub should_repeat: Option<bool>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub grammar_score: Option<i64>,
    #[serde(default)]
    pub pronunciation_score: Option<i64>,
    #[serde(default)]
    pub xp: Option<i64>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio_base64: Option<String>,
}

impl CoachingPayload {
    pub fn into_response(self) -> CoachingResponse {
        let grammar = self.grammar_score.unwrap_or(0);
        let pronunciation = self.pronunciation_score.unwrap_or(0);
        let total = match (self.score, self.grammar_score, self.pronunciation_score) {
            (Some(score), _, _) => score,
            // the service derives the total as the mean of both sub-scores;
            // out-of-range values are allowed, so widen before adding
            (None, Some(g), Some(p)) => ((i128::from(g) + i128::from(p)) / 2) as i64,
            _ => 0,
        };

        CoachingResponse {
            reply_text: self.reply.unwrap_or_default(),
            correction_text: non_empty(self.correction),
            pronunciation_tip: non_empty(self.pronunciation_tip),
            scores: Scores {
                total,
                grammar,
                pronunciation,
            },
            xp_delta: self.xp.unwrap_or(0),
            updated_memory: self.memory,
            audio_url: non_empty(self.audio_url),
            audio_base64: non_empty(self.audio_base64),
            should_repeat: self.should_repeat.unwrap_or(false),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Trait for coaching/scoring providers
#[async_trait]
pub trait CoachingProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Score a transcript and produce the coach's reply
    async fn coach(&self, request: CoachingRequest) -> Result<CoachingResponse>;

    /// Check if the provider is configured and ready
    fn is_configured(&self) -> bool;
}
