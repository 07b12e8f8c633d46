//! Music Poll Workflow.
//!
//! Used only for `operation == music_generation` against providers that
//! return a task id and expose a polling endpoint. Implements the
//! submitted → polling → (early_playback | succeeded) → done state
//! machine described in §4.8, including early-playback short-circuiting
//! and bounded tolerance of transient poll failures.

use crate::common::masking::sanitize_body_text;
use crate::error::ProviderError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const FIRST_POLL_DELAY: Duration = Duration::from_secs(15);
const SUBSEQUENT_POLL_DELAY: Duration = Duration::from_secs(20);
const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_CONSECUTIVE_TRANSIENT_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    EarlyPlayback,
    Succeeded,
    Done,
    Failed,
    TimedOut,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MusicClip {
    pub state: String,
    #[serde(default)]
    pub clip_id: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub data: Vec<MusicClip>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TerminalErrorBody {
    #[serde(default)]
    already_refunded: Option<bool>,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
}

fn is_abort_body(body: &str) -> bool {
    serde_json::from_str::<TerminalErrorBody>(body)
        .map(|b| b.already_refunded == Some(true) || b.error_type.as_deref() == Some("api_error"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct MusicOutcome {
    pub state: PollState,
    pub clips: Vec<MusicClip>,
    pub is_early_playback: bool,
}

/// Submit the rendered music-generation request; on 2xx expect
/// `{task_id}`. A missing task id is a terminal failure.
pub async fn submit(
    client: &Client,
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    body: &Value,
) -> Result<String, ProviderError> {
    let mut req = client.post(url).json(body);
    for (k, v) in headers {
        req = req.header(k, v);
    }
    let response = req.send().await.map_err(ProviderError::Http)?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http4xxOr5xx {
            status,
            status_text: "submit failed".to_string(),
            body: sanitize_body_text(&text),
        });
    }
    let parsed: SubmitResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    parsed
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::InvocationFailed("missing task_id in submit response".to_string()))
}

/// Poll `<base>/task/{task_id}` until early playback, success, failure, or
/// total-timeout. First wait is 15s, subsequent waits are 20s.
pub async fn poll_until_done(
    client: &Client,
    base: &str,
    task_id: &str,
    headers: &std::collections::HashMap<String, String>,
    total_timeout: Option<Duration>,
) -> Result<MusicOutcome, ProviderError> {
    let deadline = std::time::Instant::now() + total_timeout.unwrap_or(DEFAULT_TOTAL_TIMEOUT);
    let mut first_poll = true;
    let mut consecutive_failures = 0u32;

    loop {
        let wait = if first_poll {
            first_poll = false;
            FIRST_POLL_DELAY
        } else {
            SUBSEQUENT_POLL_DELAY
        };
        if std::time::Instant::now() + wait > deadline {
            return Ok(MusicOutcome {
                state: PollState::TimedOut,
                clips: vec![],
                is_early_playback: false,
            });
        }
        tokio::time::sleep(wait).await;

        let url = format!("{}/task/{}", base.trim_end_matches('/'), task_id);
        let mut req = client.get(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(_) => {
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_TRANSIENT_FAILURES {
                    return Err(ProviderError::NetworkError(
                        "music poll exceeded transient failure tolerance".to_string(),
                    ));
                }
                continue;
            }
        };

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            if is_abort_body(&text) {
                return Err(ProviderError::InvocationFailed(format!(
                    "music task aborted: {}",
                    sanitize_body_text(&text)
                )));
            }
            consecutive_failures += 1;
            if consecutive_failures > MAX_CONSECUTIVE_TRANSIENT_FAILURES {
                return Err(ProviderError::InvocationFailed(format!(
                    "music poll exceeded transient failure tolerance: {}",
                    sanitize_body_text(&text)
                )));
            }
            continue;
        }
        consecutive_failures = 0;

        let parsed: PollResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return Err(ProviderError::InvalidResponse(e.to_string())),
        };

        if let Some(failed) = parsed.data.iter().find(|c| c.state == "failed") {
            let message = failed
                .error
                .clone()
                .or_else(|| parsed.message.clone())
                .unwrap_or_else(|| "music generation failed".to_string());
            return Err(ProviderError::InvocationFailed(message));
        }

        let with_audio: Vec<MusicClip> = parsed
            .data
            .iter()
            .filter(|c| c.audio_url.as_deref().is_some_and(|u| !u.is_empty()))
            .cloned()
            .collect();
        if let Some(first) = with_audio.first() {
            let is_early = matches!(first.state.as_str(), "running" | "pending");
            return Ok(MusicOutcome {
                state: if is_early {
                    PollState::EarlyPlayback
                } else {
                    PollState::Succeeded
                },
                clips: with_audio,
                is_early_playback: is_early,
            });
        }
        // No audio yet; keep polling.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_body_detects_already_refunded() {
        assert!(is_abort_body(r#"{"already_refunded": true}"#));
        assert!(is_abort_body(r#"{"type": "api_error"}"#));
        assert!(!is_abort_body(r#"{"type": "other"}"#));
    }

    #[test]
    fn submit_response_rejects_missing_task_id() {
        let parsed: SubmitResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.task_id.is_none());
    }

    #[test]
    fn poll_response_parses_clip_states() {
        let body = r#"{"data":[{"state":"running","clip_id":"c1","audio_url":"https://a/x"}],"code":200}"#;
        let parsed: PollResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].state, "running");
        assert_eq!(parsed.data[0].audio_url.as_deref(), Some("https://a/x"));
    }
}
