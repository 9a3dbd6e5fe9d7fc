//! Speech output port: speaks the coach's reply
//!
//! At most one playback is active; starting a new one stops the previous one.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::CoachingResponse;

/// What to play for a coaching reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Playback {
    /// Audio clip generated by the coaching service
    Remote { url: String },
    /// Inline audio delivered with the response
    Clip {
        #[serde(skip)]
        audio: Vec<u8>,
    },
    /// Local text-to-speech fallback
    Synthesized { text: String, locale: String },
}

impl Playback {
    /// Pick the best playback for a response: remote URL, then inline
    /// audio, then local synthesis of the reply text
    pub fn select(response: &CoachingResponse, locale: &str) -> Option<Self> {
        if let Some(url) = response.audio_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(Self::Remote {
                url: url.to_string(),
            });
        }

        if let Some(encoded) = response.audio_base64.as_deref().filter(|a| !a.is_empty()) {
            match STANDARD.decode(encoded.trim()) {
                Ok(audio) if !audio.is_empty() => return Some(Self::Clip { audio }),
                Ok(_) => debug!("Inline audio is empty, using synthesis"),
                Err(e) => warn!("Failed to decode inline audio, using synthesis: {}", e),
            }
        }

        if response.reply_text.trim().is_empty() {
            return None;
        }

        Some(Self::Synthesized {
            text: response.reply_text.clone(),
            locale: locale.to_string(),
        })
    }
}

/// Trait for speech output providers
///
/// All calls start playback and return immediately; completion is not
/// reported back.
pub trait SpeechOutputProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Stream and play a remote audio clip
    fn play_remote(&self, url: &str) -> Result<()>;

    /// Play an in-memory audio clip
    fn play_clip(&self, audio: &[u8]) -> Result<()>;

    /// Speak text with the local synthesizer
    fn play_synthesized(&self, text: &str, locale: &str) -> Result<()>;

    /// Stop whatever is playing
    fn stop(&self);
}

/// Start `playback`, falling back to local synthesis when the clip cannot
/// be played
pub fn play(speech: &dyn SpeechOutputProvider, playback: Playback, reply: &str, locale: &str) {
    let result = match &playback {
        Playback::Remote { url } => speech.play_remote(url),
        Playback::Clip { audio } => speech.play_clip(audio),
        Playback::Synthesized { text, locale } => speech.play_synthesized(text, locale),
    };

    match result {
        Ok(()) => debug!("Started playback via {}", speech.name()),
        Err(e) if !matches!(playback, Playback::Synthesized { .. }) && !reply.is_empty() => {
            warn!("Audio playback failed, falling back to synthesis: {}", e);
            if let Err(e) = speech.play_synthesized(reply, locale) {
                warn!("Speech synthesis failed: {}", e);
            }
        }
        Err(e) => warn!("Speech synthesis failed: {}", e),
    }
}

/// Speech output that only logs what it would play
///
/// Tracks the active playback so preemption is visible in the logs.
#[derive(Default)]
pub struct TracingSpeechOutput {
    active: Mutex<Option<Playback>>,
}

impl TracingSpeechOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The playback started most recently and not stopped since
    pub fn active(&self) -> Option<Playback> {
        self.active.lock().clone()
    }

    fn start(&self, playback: Playback) {
        let mut active = self.active.lock();
        if let Some(previous) = active.replace(playback) {
            debug!("Preempting playback {:?}", previous);
        }
    }
}

impl SpeechOutputProvider for TracingSpeechOutput {
    fn name(&self) -> &'static str {
        "Tracing"
    }

    fn play_remote(&self, url: &str) -> Result<()> {
        info!("Playing remote audio {}", url);
        self.start(Playback::Remote {
            url: url.to_string(),
        });
        Ok(())
    }

    fn play_clip(&self, audio: &[u8]) -> Result<()> {
        info!("Playing inline clip ({} bytes)", audio.len());
        self.start(Playback::Clip {
            audio: audio.to_vec(),
        });
        Ok(())
    }

    fn play_synthesized(&self, text: &str, locale: &str) -> Result<()> {
        info!("Speaking [{}]: {}", locale, text);
        self.start(Playback::Synthesized {
            text: text.to_string(),
            locale: locale.to_string(),
        });
        Ok(())
    }

    fn stop(&self) {
        if self.active.lock().take().is_some() {
            debug!("Stopped playback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn reply(text: &str) -> CoachingResponse {
        CoachingResponse {
            reply_text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_remote_url_wins() {
        let mut response = reply("Gut!");
        response.audio_url = Some("https://coach.example/a.mp3".to_string());
        response.audio_base64 = Some(STANDARD.encode(b"mp3"));

        assert_eq!(
            Playback::select(&response, "en-US"),
            Some(Playback::Remote {
                url: "https://coach.example/a.mp3".to_string()
            })
        );
    }

    #[test]
    fn test_inline_clip_before_synthesis() {
        let mut response = reply("Gut!");
        response.audio_base64 = Some(STANDARD.encode(b"ID3 fake mp3"));

        assert_eq!(
            Playback::select(&response, "en-US"),
            Some(Playback::Clip {
                audio: b"ID3 fake mp3".to_vec()
            })
        );
    }

    #[test]
    fn test_bad_inline_audio_falls_back_to_synthesis() {
        let mut response = reply("Gut gemacht!");
        response.audio_base64 = Some("not base64 at all!!".to_string());

        assert_eq!(
            Playback::select(&response, "de-DE"),
            Some(Playback::Synthesized {
                text: "Gut gemacht!".to_string(),
                locale: "de-DE".to_string()
            })
        );
    }

    #[test]
    fn test_nothing_to_play() {
        assert_eq!(Playback::select(&reply("  "), "de-DE"), None);
    }

    #[test]
    fn test_new_playback_preempts_previous() {
        let speech = TracingSpeechOutput::new();
        speech.play_synthesized("eins", "de-DE").unwrap();
        speech.play_remote("https://coach.example/zwei.mp3").unwrap();
        assert_eq!(
            speech.active(),
            Some(Playback::Remote {
                url: "https://coach.example/zwei.mp3".to_string()
            })
        );
        speech.stop();
        assert_eq!(speech.active(), None);
    }

    struct BrokenRemote {
        synthesized: Mutex<Vec<String>>,
    }

    impl SpeechOutputProvider for BrokenRemote {
        fn name(&self) -> &'static str {
            "BrokenRemote"
        }

        fn play_remote(&self, _url: &str) -> Result<()> {
            Err(Error::PortUnavailable("no audio route".into()))
        }

        fn play_clip(&self, _audio: &[u8]) -> Result<()> {
            Err(Error::PortUnavailable("no audio route".into()))
        }

        fn play_synthesized(&self, text: &str, _locale: &str) -> Result<()> {
            self.synthesized.lock().push(text.to_string());
            Ok(())
        }

        fn stop(&self) {}
    }

    #[test]
    fn test_failed_remote_falls_back_to_synthesis() {
        let speech = BrokenRemote {
            synthesized: Mutex::new(Vec::new()),
        };
        play(
            &speech,
            Playback::Remote {
                url: "https://coach.example/a.mp3".into(),
            },
            "Hallo!",
            "de-DE",
        );
        assert_eq!(*speech.synthesized.lock(), vec!["Hallo!".to_string()]);
    }
}
