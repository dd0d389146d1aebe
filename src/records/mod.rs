//! Image records and the sources that produce them.

pub mod csv_source;
pub mod mssql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub use csv_source::CsvRecordSource;
pub use mssql::MssqlRecordSource;

/// Fallback name when the source URL path has no final segment.
const FALLBACK_FILE_NAME: &str = "image";

/// One image to migrate. Read once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub product_id: String,
    pub media_id: String,
    pub source_url: String,
    /// Original file name, normally the last segment of `source_url`.
    pub file_name: String,
    #[serde(default)]
    pub media_resource_id: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ImageRecord {
    /// Build a record whose file name is derived from the URL.
    pub fn new(
        product_id: impl Into<String>,
        media_id: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let source_url = source_url.into();
        let file_name = file_name_from_url(&source_url);
        Self {
            product_id: product_id.into(),
            media_id: media_id.into(),
            source_url,
            file_name,
            media_resource_id: None,
            order: None,
            content_type: None,
        }
    }
}

/// Anything that can hand the engine a finite, ordered list of records.
#[async_trait]
pub trait RecordSource: Send {
    /// Return at most `limit` records in a stable order.
    async fn fetch_records(&mut self, limit: u32) -> anyhow::Result<Vec<ImageRecord>>;

    /// Rows the last fetch read but dropped as unusable.
    fn skipped(&self) -> usize {
        0
    }

    /// Release connections. Default: nothing to do.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Last path segment of a URL (percent-decoding left alone), or a fallback.
pub fn file_name_from_url(raw: &str) -> String {
    let segment = match Url::parse(raw.trim()) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segs| segs.next_back().map(str::to_string)),
        // Not a URL; treat the text as a path so we still produce a name.
        Err(_) => raw
            .trim()
            .split(['?', '#'])
            .next()
            .and_then(|p| p.rsplit('/').next())
            .map(str::to_string),
    };
    match segment {
        Some(s) if !s.is_empty() => s,
        _ => FALLBACK_FILE_NAME.to_string(),
    }
}
