//! HTTP adapter for a PostgREST-style hosted record store
//!
//! Upserts are `POST` with `Prefer: resolution=merge-duplicates` so the
//! primary key acts as the idempotency token. Deletes and listings filter
//! with `owner_id=eq.` / `id=in.(...)` query operators.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{EntityKind, OwnerId, RecordId, SyncableRecord};
use crate::util::compact_text;

use super::{RecordStore, RemoteError, RemoteResult};

/// Hosted record store client
pub struct HttpRecordStore {
    rest_url: String,
    token: String,
    client: Client,
}

impl fmt::Debug for HttpRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRecordStore")
            .field("rest_url", &self.rest_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRecordStore {
    /// Build a client from endpoint config; every request carries `timeout`
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            rest_url: normalize_rest_url(&config.url),
            token: config.token.clone(),
            client,
        })
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.rest_url, kind.table())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("apikey", &self.token).bearer_auth(&self.token)
    }

    async fn check(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn upsert(&self, kind: EntityKind, records: &[SyncableRecord]) -> RemoteResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let rows = records
            .iter()
            .map(SyncableRecord::to_row)
            .collect::<serde_json::Result<Vec<_>>>()
            .map_err(|error| RemoteError::Schema(format!("failed to encode records: {error}")))?;

        let response = self
            .authorized(self.client.post(self.table_url(kind)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_by_ids(
        &self,
        kind: EntityKind,
        owner: &OwnerId,
        ids: &[RecordId],
    ) -> RemoteResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}?owner_id=eq.{}&id=in.({id_list})",
            self.table_url(kind),
            urlencoding::encode(owner.as_str()),
        );

        let response = self.authorized(self.client.delete(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_all(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<()> {
        let url = format!(
            "{}?owner_id=eq.{}",
            self.table_url(kind),
            urlencoding::encode(owner.as_str()),
        );

        let response = self.authorized(self.client.delete(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_ids(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<Vec<RecordId>> {
        let url = format!(
            "{}?select=id&owner_id=eq.{}",
            self.table_url(kind),
            urlencoding::encode(owner.as_str()),
        );

        let response = self.authorized(self.client.get(url)).send().await?;
        let response = Self::check(response).await?;
        let rows: Vec<IdRow> = response.json().await?;

        rows.into_iter()
            .map(|row| {
                row.id.parse::<RecordId>().map_err(|error| {
                    RemoteError::Schema(format!(
                        "remote returned invalid id '{}': {error}",
                        compact_text(&row.id)
                    ))
                })
            })
            .collect()
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Schema(format!("invalid response payload: {error}"))
        } else {
            Self::Transient(error.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

/// PostgREST error body shape
#[derive(Debug, Deserialize)]
struct RestErrorResponse {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RestErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.details).or(payload.hint) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let compacted = compact_text(body);
    if compacted.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{compacted} ({})", status.as_u16())
    }
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RemoteError::Ownership(message)
    } else if status.is_server_error() || matches!(status.as_u16(), 408 | 425 | 429) {
        RemoteError::Transient(message)
    } else {
        RemoteError::Schema(message)
    }
}

fn normalize_rest_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/rest/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/rest/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> HttpRecordStore {
        let config = RemoteConfig::new("https://example.supabase.co", "secret-token").unwrap();
        HttpRecordStore::new(&config, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn normalize_rest_url_appends_api_path() {
        assert_eq!(
            normalize_rest_url("https://example.supabase.co"),
            "https://example.supabase.co/rest/v1"
        );
        assert_eq!(
            normalize_rest_url("https://example.supabase.co/rest/v1/"),
            "https://example.supabase.co/rest/v1"
        );
    }

    #[test]
    fn table_url_uses_plural_tables() {
        let store = test_store();
        assert_eq!(
            store.table_url(EntityKind::Liability),
            "https://example.supabase.co/rest/v1/liabilities"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", test_store());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn classify_status_maps_auth_to_ownership() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Ownership(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "{\"message\":\"RLS\"}"),
            RemoteError::Ownership(_)
        ));
    }

    #[test]
    fn classify_status_maps_server_trouble_to_transient() {
        for code in [500, 502, 503, 408, 425, 429] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                classify_status(status, "").is_transient(),
                "expected {code} to be transient"
            );
        }
    }

    #[test]
    fn classify_status_maps_other_client_errors_to_schema() {
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            RemoteError::Schema(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, ""),
            RemoteError::Schema(_)
        ));
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let body = r#"{"message": "duplicate key", "code": "23505"}"#;
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, body),
            "duplicate key (409)"
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_body_text() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream gone"),
            "upstream gone (502)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
