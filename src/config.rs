//! Coaching endpoint configuration and practice preferences
//!
//! Values resolve from explicit arguments, then the environment, then the
//! settings table, then built-in defaults.

use std::time::Duration;

use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::{
    SETTING_COACH_URL, SETTING_SOURCE_LANG, SETTING_TARGET_LANG, SETTING_TOPIC, Storage,
};
use crate::types::{LanguagePair, Topic};

pub const DEFAULT_COACH_URL: &str = "https://genautapi.onrender.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_COACH_URL: &str = "GENAU_COACH_URL";
pub const ENV_COACH_TIMEOUT_SECS: &str = "GENAU_COACH_TIMEOUT_SECS";

/// Where and how to reach the coaching service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COACH_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("genau/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CoachConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve from the process environment and stored settings
    pub fn resolve(storage: &Storage) -> Result<Self> {
        Self::resolve_with(storage, |key| std::env::var(key).ok())
    }

    /// Resolve with a custom environment lookup
    pub fn resolve_with<F>(storage: &Storage, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = env(ENV_COACH_URL).filter(|u| !u.trim().is_empty()) {
            debug!("Coach URL from environment");
            config.base_url = url;
        } else if let Some(url) = storage.get_setting(SETTING_COACH_URL)? {
            debug!("Coach URL from settings");
            config.base_url = url;
        }

        if let Some(secs) = env(ENV_COACH_TIMEOUT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => warn!("Ignoring invalid {}={:?}", ENV_COACH_TIMEOUT_SECS, secs),
            }
        }

        config.base_url()?;
        Ok(config)
    }

    /// Parsed base URL, normalised to end with a slash so relative joins
    /// keep any path prefix
    pub fn base_url(&self) -> Result<Url> {
        let trimmed = self.base_url.trim();
        let with_slash = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };

        let url = Url::parse(&with_slash)
            .map_err(|e| Error::Config(format!("Invalid coach URL {:?}: {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::Config(format!(
                "Coach URL must use http or https, got {other}"
            ))),
        }
    }

    /// Remember a coach URL for later sessions
    pub fn save_url(storage: &Storage, url: &str) -> Result<()> {
        Self::new(url).base_url()?;
        storage.set_setting(SETTING_COACH_URL, url.trim())
    }
}

/// Language pair and topic chosen by the learner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PracticePreferences {
    pub languages: LanguagePair,
    pub topic: Topic,
}

impl PracticePreferences {
    pub fn load(storage: &Storage) -> Result<Self> {
        let defaults = Self::default();
        let source = storage.get_setting(SETTING_SOURCE_LANG)?;
        let target = storage.get_setting(SETTING_TARGET_LANG)?;

        // the pair is only taken from storage when both halves are present
        let languages = match (source, target) {
            (Some(source), Some(target)) if !source.is_empty() && !target.is_empty() => {
                LanguagePair::new(source, target)
            }
            _ => defaults.languages,
        };

        let topic = storage
            .get_setting(SETTING_TOPIC)?
            .filter(|t| !t.trim().is_empty())
            .map(|t| Topic::parse(&t))
            .unwrap_or(defaults.topic);

        Ok(Self { languages, topic })
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.set_settings(&[
            (SETTING_SOURCE_LANG, self.languages.source()),
            (SETTING_TARGET_LANG, self.languages.target()),
            (SETTING_TOPIC, self.topic.label()),
        ])
    }
}
