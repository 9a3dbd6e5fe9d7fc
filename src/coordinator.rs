//! Maps UI gestures onto engine commands
//!
//! The practice screen has a single microphone button: it starts a turn
//! when idle and stops it while recording. Everything else is ignored
//! until the engine is back in idle, except cancel.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{PracticeEngine, StopOutcome};
use crate::error::{Error, Result};
use crate::types::{LanguagePair, Topic, TurnId, TurnState};

/// User input from the practice screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum UiCommand {
    MicPressed,
    Cancel,
    SwapLanguages,
    SelectTopic(Topic),
    DismissError,
    RefreshStreak,
}

/// What happened in response to a [`UiCommand`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CoordinatorReply {
    Recording { turn_id: TurnId },
    Submitted { turn_id: TurnId },
    NothingHeard,
    Cancelled,
    LanguagesSwapped { languages: LanguagePair },
    TopicSelected { topic: Topic },
    Ok,
    /// The command does not apply right now; state is unchanged
    Rejected { message: String },
    /// A port or the store failed; the engine is back in idle
    Failed { message: String },
}

pub struct SessionCoordinator {
    engine: PracticeEngine,
}

impl SessionCoordinator {
    pub fn new(engine: PracticeEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PracticeEngine {
        &self.engine
    }

    /// Apply a command
    ///
    /// Commands that are invalid in the current state come back as
    /// [`CoordinatorReply::Rejected`], any other failure as
    /// [`CoordinatorReply::Failed`].
    pub fn handle(&self, command: UiCommand) -> CoordinatorReply {
        debug!("UI command {:?} in {}", command, self.engine.state());

        let result = match command {
            UiCommand::MicPressed => self.mic_pressed(),
            UiCommand::Cancel => self.engine.cancel().map(|_| CoordinatorReply::Cancelled),
            UiCommand::SwapLanguages => self
                .engine
                .swap_languages()
                .map(|languages| CoordinatorReply::LanguagesSwapped { languages }),
            UiCommand::SelectTopic(topic) => self
                .engine
                .set_topic(topic.clone())
                .map(|_| CoordinatorReply::TopicSelected { topic }),
            UiCommand::DismissError => {
                self.engine.clear_error();
                Ok(CoordinatorReply::Ok)
            }
            UiCommand::RefreshStreak => self.engine.refresh_streak().map(|_| CoordinatorReply::Ok),
        };

        match result {
            Ok(reply) => reply,
            Err(e @ Error::InvalidState { .. }) => CoordinatorReply::Rejected {
                message: e.to_string(),
            },
            Err(e) => {
                warn!("UI command failed: {}", e);
                CoordinatorReply::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    fn mic_pressed(&self) -> Result<CoordinatorReply> {
        match self.engine.state() {
            TurnState::Recording => match self.engine.stop_turn()? {
                StopOutcome::Empty => Ok(CoordinatorReply::NothingHeard),
                StopOutcome::Submitted { turn_id } => Ok(CoordinatorReply::Submitted { turn_id }),
            },
            _ => {
                let turn_id = self.engine.start_turn()?;
                Ok(CoordinatorReply::Recording { turn_id })
            }
        }
    }

    /// Caption for the microphone button in the current state
    pub fn mic_label(&self) -> &'static str {
        match self.engine.state() {
            TurnState::Idle => "Tap to speak",
            TurnState::Recording => "Tap to send",
            TurnState::Submitting => "Thinking...",
            TurnState::Responding => "Listen",
            TurnState::Cancelled => "Cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::EnginePorts;
    use crate::providers::{
        CoachingProvider, CoachingRequest, FeedTranscriptionProvider, TracingSpeechOutput,
    };
    use crate::storage::Storage;
    use crate::types::CoachingResponse;
    use async_trait::async_trait;

    struct SilentCoach;

    #[async_trait]
    impl CoachingProvider for SilentCoach {
        fn name(&self) -> &'static str {
            "Silent"
        }

        async fn coach(&self, _request: CoachingRequest) -> Result<CoachingResponse> {
            Ok(CoachingResponse::default())
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    fn coordinator() -> (SessionCoordinator, Arc<FeedTranscriptionProvider>) {
        let transcription = Arc::new(FeedTranscriptionProvider::new());
        let engine = PracticeEngine::new(
            Arc::new(Storage::in_memory().unwrap()),
            EnginePorts {
                transcription: transcription.clone(),
                coach: Arc::new(SilentCoach),
                speech: Arc::new(TracingSpeechOutput::new()),
            },
        )
        .unwrap();
        (SessionCoordinator::new(engine), transcription)
    }

    #[tokio::test]
    async fn test_mic_toggles_recording() {
        let (coordinator, _) = coordinator();
        assert_eq!(coordinator.mic_label(), "Tap to speak");

        let reply = coordinator.handle(UiCommand::MicPressed);
        assert_eq!(reply, CoordinatorReply::Recording { turn_id: 1 });
        assert_eq!(coordinator.mic_label(), "Tap to send");

        let reply = coordinator.handle(UiCommand::MicPressed);
        assert_eq!(reply, CoordinatorReply::NothingHeard);
        assert_eq!(coordinator.engine().state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_settings_rejected_while_recording() {
        let (coordinator, _) = coordinator();
        coordinator.handle(UiCommand::MicPressed);

        let reply = coordinator.handle(UiCommand::SwapLanguages);
        assert!(matches!(reply, CoordinatorReply::Rejected { .. }));
        let reply = coordinator.handle(UiCommand::SelectTopic(Topic::Shopping));
        assert!(matches!(reply, CoordinatorReply::Rejected { .. }));

        assert_eq!(
            coordinator.handle(UiCommand::Cancel),
            CoordinatorReply::Cancelled
        );
        let reply = coordinator.handle(UiCommand::SwapLanguages);
        assert!(matches!(reply, CoordinatorReply::LanguagesSwapped { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_microphone_is_reported() {
        let (coordinator, transcription) = coordinator();
        transcription.set_available(false);

        match coordinator.handle(UiCommand::MicPressed) {
            CoordinatorReply::Failed { message } => {
                assert!(message.starts_with("Port unavailable"))
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(coordinator.engine().state(), TurnState::Idle);
        assert!(coordinator.engine().last_error().is_some());

        assert_eq!(
            coordinator.handle(UiCommand::DismissError),
            CoordinatorReply::Ok
        );
        assert!(coordinator.engine().last_error().is_none());
    }

    #[test]
    fn test_command_wire_shape() {
        let command: UiCommand =
            serde_json::from_str(r#"{"command": "select_topic", "value": "Shopping"}"#).unwrap();
        assert_eq!(command, UiCommand::SelectTopic(Topic::Shopping));
    }
}
