//! HTTP coaching provider for the GenauTapi backend

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::CoachConfig;
use crate::error::{Error, Result};
use crate::types::{CoachingResponse, LeaderboardEntry};

use super::coaching::{CoachingPayload, CoachingProvider, CoachingRequest};

/// Coaching provider that POSTs transcripts to `<base>/chat`
pub struct HttpCoachingProvider {
    client: Client,
    base_url: Url,
}

impl HttpCoachingProvider {
    pub fn new(config: &CoachConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid endpoint {path}: {e}")))
    }

    /// Turn a relative audio path like `/static/reply.mp3` into an absolute URL
    fn resolve_audio_url(&self, url: &str) -> Option<String> {
        if Url::parse(url).is_ok() {
            return Some(url.to_string());
        }
        match self.base_url.join(url) {
            Ok(resolved) => Some(resolved.to_string()),
            Err(e) => {
                warn!("Dropping unresolvable audio URL {:?}: {}", url, e);
                None
            }
        }
    }

    /// Fetch the top entries of the public leaderboard, best score first
    pub async fn fetch_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let url = self.endpoint("leaderboard")?;
        debug!("Fetching leaderboard from {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Leaderboard error: {} - {}", status, error_text);
            return Err(Error::CoachingService(format!(
                "Leaderboard error: {} - {}",
                status, error_text
            )));
        }

        let body = response.text().await?;
        let rows: Vec<LeaderboardRow> = serde_json::from_str(&body)?;

        let mut entries: Vec<LeaderboardEntry> =
            rows.into_iter().map(LeaderboardRow::into_entry).collect();
        entries.sort_by(|a, b| b.top_score.cmp(&a.top_score));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl CoachingProvider for HttpCoachingProvider {
    fn name(&self) -> &'static str {
        "GenauTapi HTTP"
    }

    async fn coach(&self, request: CoachingRequest) -> Result<CoachingResponse> {
        let url = self.endpoint("chat")?;
        debug!(
            "Sending coaching request to {} ({} chars)",
            url,
            request.transcript.len()
        );

        let response = self.client.post(url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Coaching API error: {} - {}", status, error_text);
            return Err(Error::CoachingService(format!(
                "Coaching API error: {} - {}",
                status, error_text
            )));
        }

        let body = response.text().await?;
        let payload: CoachingPayload = serde_json::from_str(&body).map_err(|e| {
            error!("Undecodable coaching response: {}", e);
            Error::Serialization(e)
        })?;

        let mut coaching = payload.into_response();
        coaching.audio_url = coaching
            .audio_url
            .as_deref()
            .and_then(|url| self.resolve_audio_url(url));

        Ok(coaching)
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct LeaderboardRow {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default, alias = "top_score")]
    score: Option<i64>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl LeaderboardRow {
    fn into_entry(self) -> LeaderboardEntry {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .or(self.ip)
            .unwrap_or_else(|| "Anonymous".to_string());

        let location = match (self.location, self.city, self.country) {
            (Some(location), _, _) if !location.is_empty() => location,
            (_, Some(city), Some(country)) => format!("{city}, {country}"),
            (_, Some(place), None) | (_, None, Some(place)) => place,
            _ => "Unknown Location".to_string(),
        };

        LeaderboardEntry {
            name,
            location,
            top_score: self.score.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str) -> HttpCoachingProvider {
        HttpCoachingProvider::new(&CoachConfig::new(base)).unwrap()
    }

    #[test]
    fn test_relative_audio_url_resolves_against_base() {
        let provider = provider("http://192.168.68.106:8000");
        assert_eq!(
            provider.resolve_audio_url("/static/reply.mp3").as_deref(),
            Some("http://192.168.68.106:8000/static/reply.mp3")
        );
        assert_eq!(
            provider
                .resolve_audio_url("https://cdn.example/a.mp3")
                .as_deref(),
            Some("https://cdn.example/a.mp3")
        );
    }

    #[test]
    fn test_endpoints() {
        let provider = provider("https://coach.example/v1");
        assert_eq!(
            provider.endpoint("chat").unwrap().as_str(),
            "https://coach.example/v1/chat"
        );
    }

    #[test]
    fn test_leaderboard_row_shapes() {
        let rows: Vec<LeaderboardRow> = serde_json::from_str(
            r#"[
                {"ip": "10.0.0.1", "name": "Anna", "score": 92, "country": "Germany", "city": "Berlin"},
                {"ip": "10.0.0.2", "location": "Wien", "top_score": 77},
                {}
            ]"#,
        )
        .unwrap();
        let entries: Vec<_> = rows.into_iter().map(LeaderboardRow::into_entry).collect();

        assert_eq!(entries[0].name, "Anna");
        assert_eq!(entries[0].location, "Berlin, Germany");
        assert_eq!(entries[0].top_score, 92);
        assert_eq!(entries[1].name, "10.0.0.2");
        assert_eq!(entries[1].location, "Wien");
        assert_eq!(entries[1].top_score, 77);
        assert_eq!(entries[2].name, "Anonymous");
        assert_eq!(entries[2].location, "Unknown Location");
    }
}
