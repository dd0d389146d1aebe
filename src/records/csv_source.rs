//! CSV record source, for reruns and runs without database access.
//!
//! Expected header: `product_id,media_id,source_url` with optional
//! `file_name,media_resource_id,order,content_type` columns. A missing or
//! empty `file_name` is derived from the URL like the SQL Server source does.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{file_name_from_url, ImageRecord, RecordSource};

#[derive(Debug, Deserialize)]
struct CsvRow {
    product_id: String,
    media_id: String,
    source_url: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    media_resource_id: Option<String>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl From<CsvRow> for ImageRecord {
    fn from(row: CsvRow) -> Self {
        let source_url = row.source_url.trim().to_string();
        let file_name =
            non_empty(row.file_name).unwrap_or_else(|| file_name_from_url(&source_url));
        ImageRecord {
            product_id: row.product_id.trim().to_string(),
            media_id: row.media_id.trim().to_string(),
            source_url,
            file_name,
            media_resource_id: non_empty(row.media_resource_id),
            order: non_empty(row.order),
            content_type: non_empty(row.content_type),
        }
    }
}

pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse records from any reader; rows past `limit` are ignored.
pub fn read_records<R: Read>(reader: R, limit: u32) -> Result<Vec<ImageRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<CsvRow>().enumerate() {
        if out.len() >= limit as usize {
            break;
        }
        // +2: header line and 1-based numbering
        let row = row.with_context(|| format!("invalid record on line {}", idx + 2))?;
        out.push(ImageRecord::from(row));
    }
    Ok(out)
}

#[async_trait]
impl RecordSource for CsvRecordSource {
    async fn fetch_records(&mut self, limit: u32) -> Result<Vec<ImageRecord>> {
        let path = self.path.clone();
        let records = tokio::task::spawn_blocking(move || -> Result<Vec<ImageRecord>> {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening record file {}", path.display()))?;
            read_records(file, limit)
        })
        .await
        .context("record file reader task failed")??;
        info!(path = %self.path.display(), count = records.len(), "image records loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
product_id,media_id,source_url,file_name,media_resource_id,order,content_type
1,10,https://cdn.example.com/a/front.jpg,,res-1,1,image/jpeg
2,20,https://cdn.example.com/b/side.png,custom.png,,2,
3,30,https://cdn.example.com/c/back.webp,,,,
";

    #[test]
    fn reads_rows_in_file_order() {
        let records = read_records(SAMPLE.as_bytes(), 100).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(records[0].file_name, "front.jpg");
        assert_eq!(records[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(records[1].file_name, "custom.png");
        assert_eq!(records[1].content_type, None);
        assert_eq!(records[2].media_resource_id, None);
    }

    #[test]
    fn honours_limit() {
        let records = read_records(SAMPLE.as_bytes(), 2).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn minimal_header_is_enough() {
        let csv = "product_id,media_id,source_url\n9,90,https://x.example/z.gif\n";
        let records = read_records(csv.as_bytes(), 10).unwrap();
        assert_eq!(records[0].file_name, "z.gif");
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let csv = "product_id,source_url\n9,https://x.example/z.gif\n";
        assert!(read_records(csv.as_bytes(), 10).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let mut src = CsvRecordSource::new("/nonexistent/records.csv");
        assert!(src.fetch_records(10).await.is_err());
    }
}
