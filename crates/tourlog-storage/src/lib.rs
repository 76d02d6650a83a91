//! Persistence port, its two backends, and the session layer for tourlog.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use tourlog_core::{pick_unvisited, roll_allowed, Ledger, ROLL_COOLDOWN_MS};

pub const CRATE_NAME: &str = "tourlog-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored ledger is unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("data service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("data service rejected the request with status {0}")]
    HttpStatus(StatusCode),
}

/// Read/write boundary the ledger is saved through. Exactly one backend is
/// active per session; switching reseeds, it never merges.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn load(&self) -> Result<Option<Ledger>, StoreError>;
    async fn save(&self, ledger: &Ledger) -> Result<(), StoreError>;
}

/// Per-device durable store: one pretty-printed JSON file, written with an
/// atomic temp-file rename.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl PersistencePort for LocalStore {
    async fn load(&self) -> Result<Option<Ledger>, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(ledger)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self
            .path
            .with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err.into())
            }
        }
    }
}

/// Connection settings for the remote data service.
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl RemoteStoreConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TOURLOG_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8787".to_string()),
            token: std::env::var("TOURLOG_AUTH_TOKEN").unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("TOURLOG_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

/// Per-account remote store: a thin adapter over the data service's
/// `GET/POST /api/data` endpoints, authenticated with a bearer token.
#[derive(Debug)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RemoteStore {
    pub fn new(config: RemoteStoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    data: Option<Ledger>,
}

#[async_trait]
impl PersistencePort for RemoteStore {
    async fn load(&self) -> Result<Option<Ledger>, StoreError> {
        let resp = self
            .client
            .get(format!("{}/api/data", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::HttpStatus(resp.status()));
        }
        let envelope: DataEnvelope = resp.json().await?;
        Ok(envelope.data)
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(format!("{}/api/data", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "data": ledger }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::HttpStatus(resp.status()));
        }
        Ok(())
    }
}

/// Which backend the session currently writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Local,
    Remote,
}

/// The single mutator owning a ledger for one user session.
///
/// Mutations are applied optimistically: the in-memory ledger changes first
/// and sticks even when the persist fails. Persist failures are logged, not
/// rolled back — the durable copy is eventually consistent, not
/// transactional.
pub struct Session {
    ledger: Ledger,
    port: Arc<dyn PersistencePort>,
    mode: StoreMode,
    last_roll_ms: u64,
    cooldown_enabled: bool,
}

impl Session {
    /// Load the ledger from the port, seeding from the catalog when the store
    /// is empty.
    pub async fn open(port: Arc<dyn PersistencePort>, mode: StoreMode) -> Result<Self, StoreError> {
        let ledger = port.load().await?.unwrap_or_else(Ledger::seed);
        Ok(Self {
            ledger,
            port,
            mode,
            last_roll_ms: 0,
            cooldown_enabled: true,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn set_cooldown_enabled(&mut self, enabled: bool) {
        self.cooldown_enabled = enabled;
    }

    /// Mutate the ledger and persist fire-and-forget. Must run inside a tokio
    /// runtime; there is no cancellation protocol for the in-flight persist.
    pub fn apply<F, T>(&mut self, mutate: F) -> T
    where
        F: FnOnce(&mut Ledger) -> T,
    {
        let out = mutate(&mut self.ledger);
        let port = Arc::clone(&self.port);
        let snapshot = self.ledger.clone();
        tokio::spawn(async move {
            if let Err(err) = port.save(&snapshot).await {
                warn!(error = %err, "ledger persist failed; in-memory state kept");
            }
        });
        out
    }

    /// Mutate the ledger and await the persist. The mutation still sticks
    /// when the persist fails.
    pub async fn apply_now<F, T>(&mut self, mutate: F) -> T
    where
        F: FnOnce(&mut Ledger) -> T,
    {
        let out = mutate(&mut self.ledger);
        if let Err(err) = self.port.save(&self.ledger).await {
            warn!(error = %err, "ledger persist failed; in-memory state kept");
        }
        out
    }

    pub async fn persist_now(&self) -> Result<(), StoreError> {
        self.port.save(&self.ledger).await
    }

    /// Roll random unvisited suggestions, gated by the advisory cooldown.
    /// Returns `None` while the cooldown holds.
    pub fn roll(&mut self, count: usize, now_ms: u64) -> Option<Vec<String>> {
        if self.cooldown_enabled && !roll_allowed(self.last_roll_ms, now_ms, ROLL_COOLDOWN_MS) {
            return None;
        }
        self.last_roll_ms = now_ms;
        Some(pick_unvisited(&self.ledger, count))
    }

    /// Switch the active backend (login/logout). The current ledger is
    /// discarded and replaced by the new store's content or a fresh seed.
    pub async fn switch(
        &mut self,
        port: Arc<dyn PersistencePort>,
        mode: StoreMode,
    ) -> Result<(), StoreError> {
        self.port = port;
        self.mode = mode;
        self.last_roll_ms = 0;
        self.ledger = self.port.load().await?.unwrap_or_else(Ledger::seed);
        Ok(())
    }

    /// Replace the ledger with a fresh seed (account reset) and persist it.
    pub async fn reset_to_seed(&mut self) {
        self.apply_now(|ledger| *ledger = Ledger::seed()).await;
    }
}

/// Best-effort journey-duration client. Every failure degrades to `None`;
/// nothing here is ever surfaced as an error.
pub struct JourneyClient {
    client: reqwest::Client,
    base_url: String,
    resolved: Mutex<HashMap<String, String>>,
}

impl JourneyClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://v5.vbb.transport.rest";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    /// Door-to-door minutes between two stations, or `None` when anything
    /// along the way fails.
    pub async fn journey_minutes(&self, from: &str, to: &str) -> Option<u32> {
        let from_id = self.resolve(from).await?;
        let to_id = self.resolve(to).await?;

        let body = self
            .get_json(
                "/journeys",
                &[("from", from_id.as_str()), ("to", to_id.as_str()), ("results", "1")],
            )
            .await?;
        let legs = body.get("journeys")?.get(0)?.get("legs")?.as_array()?;
        let departure = legs.first()?.get("departure")?.as_str()?;
        let arrival = legs.last()?.get("arrival")?.as_str()?;

        let departure = DateTime::parse_from_rfc3339(departure).ok()?;
        let arrival = DateTime::parse_from_rfc3339(arrival).ok()?;
        let minutes = ((arrival - departure).num_seconds() as f64 / 60.0).round();
        u32::try_from(minutes as i64).ok()
    }

    /// Resolve a free-text station query to a location id, caching hits.
    /// Inputs that already look like ids or coordinates pass through.
    async fn resolve(&self, query: &str) -> Option<String> {
        if query.is_empty() {
            return None;
        }
        if looks_like_location_id(query) || looks_like_coordinates(query) {
            return Some(query.to_string());
        }
        if let Some(hit) = self.resolved.lock().await.get(query) {
            return Some(hit.clone());
        }

        let body = self
            .get_json("/locations", &[("query", query), ("results", "1")])
            .await?;
        let id = body.get(0)?.get("id")?.as_str()?.to_string();
        self.resolved
            .lock()
            .await
            .insert(query.to_string(), id.clone());
        Some(id)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Option<Value> {
        let url = format!("{}{}", self.base_url, path);
        let result = self.client.get(&url).query(query).send().await;
        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(status = %resp.status(), %url, "journey lookup rejected");
                return None;
            }
            Err(err) => {
                debug!(error = %err, %url, "journey lookup failed");
                return None;
            }
        };
        match resp.json().await {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, %url, "journey response was not json");
                None
            }
        }
    }
}

fn looks_like_location_id(input: &str) -> bool {
    input.len() >= 6 && input.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_coordinates(input: &str) -> bool {
    let Some((lat, lon)) = input.split_once(',') else {
        return false;
    };
    lat.parse::<f64>().is_ok() && lon.parse::<f64>().is_ok()
}
