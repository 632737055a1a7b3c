//! HTTP implementation of the sync engine's remote port, speaking to a
//! `tend serve` backend.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use tend_core::migrate::upgrade_record;
use tend_core::models::DayRecord;
use tend_core::sync::{Identity, RemoteDayRow, RemoteStore, TransportError};

pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct MetaResponse {
    updated_at_ms: i64,
}

#[derive(Deserialize)]
struct AccountResponse {
    account: String,
}

#[derive(Deserialize)]
struct DayRowResponse {
    date: String,
    record: serde_json::Value,
    updated_at_ms: i64,
}

fn transport(err: &reqwest::Error) -> TransportError {
    TransportError::new(err.to_string())
}

fn status_error(context: &str, status: StatusCode) -> TransportError {
    TransportError::new(format!("{context}: server returned {status}"))
}

impl HttpRemote {
    #[must_use]
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Resolve the account id the token maps to. Used by `tend connect`
    /// both as a connectivity check and to learn the identity.
    pub async fn account(&self) -> Result<String, TransportError> {
        let resp = self
            .client
            .get(format!("{}/api/account", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        if !resp.status().is_success() {
            return Err(status_error("failed to resolve account", resp.status()));
        }
        let body: AccountResponse = resp.json().await.map_err(|e| transport(&e))?;
        Ok(body.account)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_updated_at(
        &self,
        _account: &str,
        date_key: &str,
    ) -> Result<Option<i64>, TransportError> {
        let resp = self
            .client
            .get(format!("{}/api/days/{date_key}/meta", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error("failed to fetch day metadata", resp.status()));
        }
        let body: MetaResponse = resp.json().await.map_err(|e| transport(&e))?;
        Ok(Some(body.updated_at_ms))
    }

    async fn upsert_day(
        &self,
        _account: &str,
        date_key: &str,
        record: &DayRecord,
    ) -> Result<i64, TransportError> {
        let resp = self
            .client
            .put(format!("{}/api/days/{date_key}", self.base_url))
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        if !resp.status().is_success() {
            return Err(status_error("failed to push day", resp.status()));
        }
        let body: MetaResponse = resp.json().await.map_err(|e| transport(&e))?;
        Ok(body.updated_at_ms)
    }

    async fn list_range(
        &self,
        _account: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Vec<RemoteDayRow>, TransportError> {
        let resp = self
            .client
            .get(format!(
                "{}/api/days?start={start_key}&end={end_key}",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        if !resp.status().is_success() {
            return Err(status_error("failed to list days", resp.status()));
        }
        let body: Vec<DayRowResponse> = resp.json().await.map_err(|e| transport(&e))?;
        // Rows pushed by older clients may carry older record shapes;
        // upgrade on the way in, exactly like a local read.
        Ok(body
            .into_iter()
            .map(|row| RemoteDayRow {
                date: row.date,
                record: upgrade_record(row.record),
                updated_at_ms: row.updated_at_ms,
            })
            .collect())
    }
}

/// Identity as seen by this CLI: the account recorded at connect time, or
/// none when the device has never been connected.
pub struct CliIdentity(pub Option<String>);

impl Identity for CliIdentity {
    fn current_account(&self) -> Option<String> {
        self.0.clone()
    }
}
