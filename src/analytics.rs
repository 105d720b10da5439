use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{GuidanceError, Result};
use crate::types::NavigationRecord;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";

/// Receiver for finished navigation sessions.
///
/// Implementations must not block: the guidance loop calls this inline and
/// never waits on the outcome.
pub trait AnalyticsSink: Send + Sync {
    fn record_navigation(&self, record: NavigationRecord);

    /// Close the usage session without waiting for a response.
    fn end_session_beacon(&self) {}
}

/// `{success, data}` wrapper used by every backend response
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserType {
    pub id: i64,
    pub type_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Backend-side visitor session, distinct from a guidance session
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UsageSession {
    pub session_id: Option<i64>,
    pub user_type_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StartSessionRequest {
    user_type_id: i64,
    device_info: String,
}

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    success: bool,
    #[serde(default)]
    session_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EndSessionRequest {
    session_id: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NavigationPayload {
    pub session_id: i64,
    pub poi_id: i64,
    pub user_type_id: i64,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub duration_seconds: u64,
    pub distance_meters: u64,
    pub completed: bool,
    /// ISO-8601 with milliseconds, UTC
    pub navigation_timestamp: String,
}

impl NavigationPayload {
    /// `None` when no usage session is open.
    pub fn new(session: UsageSession, record: &NavigationRecord, at: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            session_id: session.session_id?,
            poi_id: record.destination_id,
            user_type_id: session.user_type_id?,
            origin_latitude: record.origin_latitude,
            origin_longitude: record.origin_longitude,
            duration_seconds: record.duration_seconds,
            distance_meters: record.distance_meters,
            completed: record.completed,
            navigation_timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchPayload {
    pub session_id: i64,
    pub search_query: String,
    pub results_count: usize,
}

/// Client for the usage-analytics backend
///
/// Session bookkeeping calls are awaited by the caller; navigation reports and
/// the teardown beacon are spawned on the current tokio runtime and only logged
/// on failure.
#[derive(Clone)]
pub struct HttpAnalytics {
    client: reqwest::Client,
    base_url: String,
    session: Arc<Mutex<UsageSession>>,
}

impl HttpAnalytics {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("wayfinder_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Arc::new(Mutex::new(UsageSession::default())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    pub fn session(&self) -> UsageSession {
        self.session
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    pub fn has_session(&self) -> bool {
        self.session().session_id.is_some()
    }

    /// Adopt a session opened elsewhere (e.g. restored after restart).
    pub fn restore_session(&self, session_id: i64, user_type_id: i64) {
        if let Ok(mut session) = self.session.lock() {
            session.session_id = Some(session_id);
            session.user_type_id = Some(user_type_id);
        }
        log::info!("Usage session {} restored", session_id);
    }

    pub async fn user_types(&self) -> Result<Vec<UserType>> {
        let envelope: Envelope<Vec<UserType>> = self
            .client
            .get(self.url("user-types"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Open a usage session for the given visitor type. Returns the session id.
    pub async fn start_session(&self, user_type_id: i64) -> Result<i64> {
        let request = StartSessionRequest {
            user_type_id,
            device_info: device_info(),
        };
        let response: StartSessionResponse = self
            .client
            .post(self.url("session/start"))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match (response.success, response.session_id) {
            (true, Some(session_id)) => {
                if let Ok(mut session) = self.session.lock() {
                    session.session_id = Some(session_id);
                    session.user_type_id = Some(user_type_id);
                }
                log::info!("Usage session {} started (user type {})", session_id, user_type_id);
                Ok(session_id)
            }
            _ => Err(GuidanceError::Analytics(
                "session/start rejected by backend".to_string(),
            )),
        }
    }

    /// Close the usage session. No-op without one.
    pub async fn end_session(&self) -> Result<()> {
        let Some(session_id) = self.take_session_id() else {
            return Ok(());
        };
        self.client
            .post(self.url("session/end"))
            .json(&EndSessionRequest { session_id })
            .send()
            .await?
            .error_for_status()?;
        log::info!("Usage session {} ended", session_id);
        Ok(())
    }

    /// Log a destination search. Skipped with a warning without a session.
    pub async fn register_search(&self, query: &str, results_count: usize) -> Result<bool> {
        let Some(session_id) = self.session().session_id else {
            log::warn!("No usage session, search not logged");
            return Ok(false);
        };
        let payload = SearchPayload {
            session_id,
            search_query: query.to_string(),
            results_count,
        };
        self.client
            .post(self.url("search"))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(true)
    }

    /// Post a navigation record and wait for the backend.
    pub async fn send_navigation(&self, record: &NavigationRecord) -> Result<bool> {
        let Some(payload) = NavigationPayload::new(self.session(), record, Utc::now()) else {
            log::warn!("No usage session, navigation to #{} not recorded", record.destination_id);
            return Ok(false);
        };
        post_navigation(&self.client, &self.url("navigation"), &payload).await?;
        Ok(true)
    }

    fn take_session_id(&self) -> Option<i64> {
        self.session.lock().ok().and_then(|mut s| {
            let id = s.session_id.take();
            s.user_type_id = None;
            id
        })
    }
}

async fn post_navigation(client: &reqwest::Client, url: &str, payload: &NavigationPayload) -> Result<()> {
    let envelope: Envelope<serde_json::Value> = client
        .post(url)
        .json(payload)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if envelope.success {
        Ok(())
    } else {
        Err(GuidanceError::Analytics(
            envelope.message.unwrap_or_else(|| "navigation rejected".to_string()),
        ))
    }
}

impl AnalyticsSink for HttpAnalytics {
    fn record_navigation(&self, record: NavigationRecord) {
        let Some(payload) = NavigationPayload::new(self.session(), &record, Utc::now()) else {
            log::warn!("No usage session, navigation to #{} not recorded", record.destination_id);
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No async runtime, navigation to #{} dropped", record.destination_id);
            return;
        };

        let client = self.client.clone();
        let url = self.url("navigation");
        handle.spawn(async move {
            match post_navigation(&client, &url, &payload).await {
                Ok(()) => log::info!(
                    "Navigation recorded: #{} {} m {} s completed={}",
                    payload.poi_id,
                    payload.distance_meters,
                    payload.duration_seconds,
                    payload.completed
                ),
                Err(e) => log::warn!("Failed to record navigation: {}", e),
            }
        });
    }

    fn end_session_beacon(&self) {
        let Some(session_id) = self.take_session_id() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No async runtime, session {} left open", session_id);
            return;
        };

        let request = self
            .client
            .post(self.url("session/end"))
            .json(&EndSessionRequest { session_id });
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                log::warn!("session/end beacon failed: {}", e);
            }
        });
    }
}

fn device_info() -> String {
    serde_json::json!({
        "userAgent": concat!("wayfinder_rs/", env!("CARGO_PKG_VERSION")),
        "platform": std::env::consts::OS,
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}

/// In-memory sink; keeps every record it is handed
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<NavigationRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NavigationRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl AnalyticsSink for RecordingSink {
    fn record_navigation(&self, record: NavigationRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
