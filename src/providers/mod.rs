//! Port abstraction layer for transcription, coaching and speech output
//!
//! The engine only talks to these traits; platform recognizers, the HTTP
//! coaching backend and audio playback plug in behind them.
mod coaching;
mod http;
pub mod speech;
mod transcription;

pub use coaching::{CoachingPayload, CoachingProvider, CoachingRequest};
pub use http::HttpCoachingProvider;
pub use speech::{Playback, SpeechOutputProvider, TracingSpeechOutput};
pub use transcription::{
    FeedTranscriptionProvider, SessionControl, TranscriptFeed, TranscriptStream,
    TranscriptionEvent, TranscriptionProvider, TranscriptionSession, transcript_channel,
};
