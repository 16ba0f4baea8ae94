use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http_client::http_client;
use crate::identity::DeviceToken;
use crate::marks::{EntrantId, MarkSheet};
use crate::prediction::Scope;

pub const TOKEN_HEADER: &str = "X-Token";
pub const NICKNAME_MAX_CHARS: usize = 20;

const MSG_TRANSPORT: &str = "Could not reach the server. Check the connection and retry.";
const MSG_DECODE: &str = "The server returned an unexpected response.";
const MSG_PREDICTIONS: &str = "Failed to load predictions";
const MSG_SAVE: &str = "Failed to save prediction";
const MSG_RACES: &str = "Failed to load races";
const MSG_REFRESH: &str = "Failed to refresh race data";
const MSG_STATUS: &str = "Failed to load refresh status";
const MSG_GROUPS: &str = "Failed to load groups";
const MSG_USER: &str = "Failed to load user";
const MSG_REGISTER: &str = "Registration failed";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("rate limited: {message}")]
    RateLimited { status: FetchStatus, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(message)
            | ApiError::Rejected { message, .. }
            | ApiError::RateLimited { message, .. } => message.clone(),
            ApiError::Transport(_) => MSG_TRANSPORT.to_string(),
            ApiError::Decode(_) => MSG_DECODE.to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceInfo {
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub race_number: u32,
    #[serde(default)]
    pub race_name: String,
    #[serde(default)]
    pub post_time: Option<String>,
    #[serde(default)]
    pub distance: Option<u32>,
    #[serde(default)]
    pub surface: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entrant {
    pub id: EntrantId,
    /// Display number only.
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub jockey_name: Option<String>,
    #[serde(default)]
    pub scratched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub is_mine: bool,
    #[serde(flatten)]
    pub marks: MarkSheet,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PredictionsResponse {
    pub race: RaceInfo,
    #[serde(default, alias = "entrants")]
    pub horses: Vec<Entrant>,
    #[serde(default)]
    pub predictions: Vec<PredictionRecord>,
}

impl PredictionsResponse {
    pub fn mine(&self) -> Option<&PredictionRecord> {
        self.predictions.iter().find(|p| p.is_mine)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePredictionBody {
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub marks: MarkSheet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStatus {
    #[serde(default = "default_true")]
    pub can_fetch: bool,
    #[serde(default)]
    pub last_fetch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_available_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl FetchStatus {
    /// Seconds to wait, preferring the server's explicit value.
    pub fn wait_seconds(&self, now: DateTime<Utc>) -> u64 {
        if let Some(secs) = self.retry_after_seconds {
            return secs;
        }
        self.next_available_time
            .map(|next| (next - now).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSummary {
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub race_number: u32,
    #[serde(default)]
    pub race_name: String,
    #[serde(default)]
    pub post_time: Option<String>,
    #[serde(default)]
    pub distance: Option<u32>,
    #[serde(default)]
    pub surface: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub horse_count: u32,
    #[serde(default)]
    pub has_prediction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub venue: String,
    #[serde(default)]
    pub races: Vec<RaceSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    #[serde(default, alias = "lastFetchTime")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub venues: Vec<Venue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub is_owner: bool,
}

#[derive(Debug, Deserialize)]
struct VenuesEnvelope {
    #[serde(default)]
    venues: Vec<Venue>,
}

#[derive(Debug, Deserialize)]
struct GroupsEnvelope {
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: DeviceToken,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: DeviceToken, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = http_client(timeout)?.clone();
        Ok(Self {
            base_url,
            token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetch_predictions(&self, scope: &Scope) -> Result<PredictionsResponse, ApiError> {
        let mut req = self.get(&format!("/api/races/{}/predictions", scope.race_id));
        if let Some(group_id) = scope.group_id.as_deref() {
            req = req.query(&[("groupId", group_id)]);
        }
        let (status, body) = send(req)?;
        check_status(status, &body, MSG_PREDICTIONS)?;
        parse_predictions_json(&body)
    }

    pub fn save_prediction(&self, race_id: &str, body: &SavePredictionBody) -> Result<(), ApiError> {
        let req = self
            .post(&format!("/api/races/{race_id}/predictions"))
            .json(body);
        let (status, raw) = send(req)?;
        check_status(status, &raw, MSG_SAVE)
    }

    pub fn fetch_races(&self, date: NaiveDate) -> Result<Vec<Venue>, ApiError> {
        let req = self
            .get("/api/external-races")
            .query(&[("date", date_param(date))]);
        let (status, body) = send(req)?;
        check_status(status, &body, MSG_RACES)?;
        parse_venues_json(&body)
    }

    pub fn fetch_status(&self, date: NaiveDate) -> Result<FetchStatus, ApiError> {
        let req = self
            .get("/api/external-races/fetch-status")
            .query(&[("date", date_param(date))]);
        let (status, body) = send(req)?;
        check_status(status, &body, MSG_STATUS)?;
        decode(&body)
    }

    /// Asks the server to scrape fresh race data for `date`.
    pub fn trigger_fetch(&self, date: NaiveDate) -> Result<FetchOutcome, ApiError> {
        let req = self
            .post("/api/external-races/fetch")
            .json(&serde_json::json!({ "date": date_param(date) }));
        let (status, body) = send(req)?;
        classify_fetch_response(status.as_u16(), &body)
    }

    pub fn me(&self) -> Result<Option<User>, ApiError> {
        let (status, body) = send(self.get("/api/users/me"))?;
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        check_status(status, &body, MSG_USER)?;
        decode(&body).map(Some)
    }

    pub fn register(&self, nickname: &str) -> Result<User, ApiError> {
        let nickname = validate_nickname(nickname)?;
        let req = self
            .post("/api/users/register")
            .json(&serde_json::json!({ "nickname": nickname }));
        let (status, body) = send(req)?;
        check_status(status, &body, MSG_REGISTER)?;
        decode(&body)
    }

    pub fn groups(&self) -> Result<Vec<Group>, ApiError> {
        let (status, body) = send(self.get("/api/groups"))?;
        check_status(status, &body, MSG_GROUPS)?;
        let envelope: GroupsEnvelope = decode(&body)?;
        Ok(envelope.groups)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .header(TOKEN_HEADER, self.token.as_str())
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header(TOKEN_HEADER, self.token.as_str())
    }
}

fn send(req: RequestBuilder) -> Result<(StatusCode, String), ApiError> {
    let resp = req.send().map_err(|err| {
        warn!(error = %err, "request failed");
        ApiError::Transport(err.to_string())
    })?;
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|err| ApiError::Transport(format!("failed reading body: {err}")))?;
    debug!(%status, bytes = body.len(), "response received");
    Ok((status, body))
}

fn check_status(status: StatusCode, body: &str, fallback: &str) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message: parse_error_message(body).unwrap_or_else(|| fallback.to_string()),
    })
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body.trim()).map_err(|err| ApiError::Decode(err.to_string()))
}

fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Maps a `/fetch` response to its outcome; 429 carries the cooldown.
pub fn classify_fetch_response(status: u16, body: &str) -> Result<FetchOutcome, ApiError> {
    if status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        let cooldown: FetchStatus = decode(body).unwrap_or_else(|_| FetchStatus {
            can_fetch: false,
            ..FetchStatus::default()
        });
        let message = parse_error_message(body).unwrap_or_else(|| MSG_REFRESH.to_string());
        return Err(ApiError::RateLimited {
            status: FetchStatus {
                can_fetch: false,
                ..cooldown
            },
            message,
        });
    }
    if !(200..300).contains(&status) {
        return Err(ApiError::Rejected {
            status,
            message: parse_error_message(body).unwrap_or_else(|| MSG_REFRESH.to_string()),
        });
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(FetchOutcome {
            fetched_at: None,
            venues: Vec::new(),
        });
    }
    decode(trimmed)
}

pub fn parse_predictions_json(raw: &str) -> Result<PredictionsResponse, ApiError> {
    decode(raw)
}

pub fn parse_venues_json(raw: &str) -> Result<Vec<Venue>, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let envelope: VenuesEnvelope = decode(trimmed)?;
    Ok(envelope.venues)
}

pub fn parse_fetch_status_json(raw: &str) -> Result<FetchStatus, ApiError> {
    decode(raw)
}

/// Extracts the `error` (or `message`) field of an error payload.
pub fn parse_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn validate_nickname(raw: &str) -> Result<&str, ApiError> {
    let nickname = raw.trim();
    if nickname.is_empty() {
        return Err(ApiError::Validation("Nickname is required".to_string()));
    }
    if nickname.chars().count() > NICKNAME_MAX_CHARS {
        return Err(ApiError::Validation(format!(
            "Nickname must be at most {NICKNAME_MAX_CHARS} characters"
        )));
    }
    Ok(nickname)
}
