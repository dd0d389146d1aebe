//! Network seams of the transfer engine and their reqwest implementations.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use url::Url;

use crate::config::UploadConfig;
use crate::error::StepError;
use crate::records::ImageRecord;

/// Response bodies are cut to this many characters before they reach logs or reports.
pub const MAX_EXCERPT_CHARS: usize = 400;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Downloads image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, StepError>;
}

/// One upload: the record, the name to present the file under, and its bytes.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub record: &'a ImageRecord,
    pub file_name: &'a str,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

/// Sends image bytes to the destination storage API.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, StepError>;
}

/// Shared client for downloads and uploads.
pub fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("media-migrate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

/// Trim and cap a response body for logging. JSON bodies are re-emitted
/// compactly so they stay on one line.
pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    let text = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value.to_string(),
        Err(_) => trimmed.to_string(),
    };
    match text.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((cut, _)) => {
            let mut out = text[..cut].to_string();
            out.push('…');
            out
        }
        None => text,
    }
}

fn network(e: reqwest::Error) -> StepError {
    StepError::Network(e.to_string())
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, StepError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StepError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        resp.bytes().await.map_err(network)
    }
}

#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    config: UploadConfig,
}

impl HttpUploader {
    pub fn new(client: Client, config: UploadConfig) -> Self {
        Self { client, config }
    }
}

/// Text fields sent next to the file part, in wire order.
pub fn form_fields(
    record: &ImageRecord,
    tenant_id: &str,
    date: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("TenantId", tenant_id.to_string()),
        ("EntityType", "product".to_string()),
        ("EntityId", record.product_id.clone()),
        (
            "MediaResourceId",
            record.media_resource_id.clone().unwrap_or_default(),
        ),
        ("Order", record.order.clone().unwrap_or_default()),
        ("InternalCode", record.product_id.clone()),
        ("MediaType", "image".to_string()),
        ("Date", date.to_string()),
    ]
}

#[async_trait]
impl ImageUploader for HttpUploader {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<UploadReceipt, StepError> {
        let content_type = request
            .record
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let part = Part::bytes(request.bytes.to_vec())
            .file_name(request.file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| StepError::InvalidRecord(format!("content type {content_type:?}: {e}")))?;

        let date = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let form = form_fields(request.record, &self.config.tenant_id, &date)
            .into_iter()
            .fold(Form::new().part("FormFile", part), |form, (k, v)| form.text(k, v));

        let resp = self
            .client
            .post(self.config.url.clone())
            .header(ACCEPT, "application/json")
            .header("api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(network)?;
        let status = resp.status();
        let body = resp.text().await.map_err(network)?;
        if status.is_success() {
            Ok(UploadReceipt {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(StepError::Status {
                status: status.as_u16(),
                body: excerpt(&body),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_caps_long_bodies_on_char_boundaries() {
        let body = "é".repeat(MAX_EXCERPT_CHARS + 10);
        let cut = excerpt(&body);
        assert_eq!(cut.chars().count(), MAX_EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn json_bodies_are_compacted() {
        let body = "{\n  \"id\": \"abc\",\n  \"ok\": true\n}\n";
        assert_eq!(excerpt(body), r#"{"id":"abc","ok":true}"#);
    }

    #[test]
    fn form_carries_product_and_media_metadata() {
        let mut record = ImageRecord::new("1042", "77", "https://cdn.example.com/front.jpg");
        record.media_resource_id = Some("res-9".into());
        record.order = Some("3".into());
        let fields = form_fields(&record, "2", "2026-10-19T00:00:00Z");
        let get = |k: &str| {
            fields
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("TenantId"), Some("2"));
        assert_eq!(get("EntityType"), Some("product"));
        assert_eq!(get("EntityId"), Some("1042"));
        assert_eq!(get("InternalCode"), Some("1042"));
        assert_eq!(get("MediaResourceId"), Some("res-9"));
        assert_eq!(get("Order"), Some("3"));
        assert_eq!(get("MediaType"), Some("image"));
        assert_eq!(get("Date"), Some("2026-10-19T00:00:00Z"));
    }

    #[test]
    fn missing_metadata_is_sent_empty() {
        let record = ImageRecord::new("1", "2", "https://cdn.example.com/a.png");
        let fields = form_fields(&record, "2", "d");
        assert!(fields
            .iter()
            .any(|(k, v)| *k == "MediaResourceId" && v.is_empty()));
    }

    #[test]
    fn client_builds() {
        assert!(build_client(Duration::from_secs(1)).is_ok());
    }
}
