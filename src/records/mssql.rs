//! SQL Server record source.
//!
//! One parameterized SELECT over the product/media link tables, read through
//! Tiberius on a plain tokio `TcpStream`. Identifier columns are cast to
//! NVARCHAR server-side so the reader does not care whether they are ints or
//! uniqueidentifiers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, instrument, warn};

use super::{file_name_from_url, ImageRecord, RecordSource};
use crate::config::DbConfig;

const ACTIVE_IMAGES_SQL: &str = r#"
SELECT TOP (@P1)
    CAST(p.ProductId AS NVARCHAR(64))        AS ProductId,
    CAST(m.MediaId AS NVARCHAR(64))          AS MediaId,
    CAST(m.URL AS NVARCHAR(2048))            AS Url,
    CAST(m.MediaResourceId AS NVARCHAR(64))  AS MediaResourceId,
    CAST(pm.[Order] AS NVARCHAR(32))         AS SortOrder,
    CAST(m.[ContentType] AS NVARCHAR(128))   AS ContentType
FROM mdl04.tblProduct p
INNER JOIN mdl04.linkProductMedia pm ON p.ProductId = pm.ProductId
INNER JOIN mdl04.tblMedia m ON pm.MediaId = m.MediaId
WHERE m.MediaResourceId = @P2
  AND p.Status = 1
  AND pm.Status = 1
  AND m.Status = 1
  AND m.ParentId IS NULL
ORDER BY p.CreatedDate ASC, p.ProductId ASC, m.MediaId ASC
"#;

type TdsClient = Client<Compat<TcpStream>>;

pub struct MssqlRecordSource {
    client: Option<TdsClient>,
    media_resource_id: String,
    skipped: usize,
}

impl MssqlRecordSource {
    // SECURITY: never include credentials in tracing spans.
    #[instrument(skip_all, fields(host = %cfg.host, port = cfg.port, database = %cfg.database))]
    pub async fn connect(cfg: &DbConfig, media_resource_id: impl Into<String>) -> Result<Self> {
        let config = build_config(cfg);
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .with_context(|| format!("connecting to SQL Server at {}:{}", cfg.host, cfg.port))?;
        tcp.set_nodelay(true).ok();
        let client = Client::connect(config, tcp.compat_write())
            .await
            .context("SQL Server login failed")?;
        info!("connected to SQL Server");
        Ok(Self {
            client: Some(client),
            media_resource_id: media_resource_id.into(),
            skipped: 0,
        })
    }
}

fn build_config(cfg: &DbConfig) -> Config {
    let mut config = Config::new();
    config.host(&cfg.host);
    config.port(cfg.port);
    config.database(&cfg.database);
    config.authentication(AuthMethod::sql_server(&cfg.username, &cfg.password));
    if cfg.trust_cert {
        config.trust_cert();
    }
    config.encryption(EncryptionLevel::Required);
    config
}

#[async_trait]
impl RecordSource for MssqlRecordSource {
    async fn fetch_records(&mut self, limit: u32) -> Result<Vec<ImageRecord>> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| anyhow!("SQL Server connection already closed"))?;

        info!(limit, media_resource_id = %self.media_resource_id, "fetching image records");
        let top = i64::from(limit);
        let mut query = Query::new(ACTIVE_IMAGES_SQL);
        query.bind(top);
        query.bind(self.media_resource_id.as_str());

        let stream = query
            .query(client)
            .await
            .context("image record query failed")?;
        let rows = stream
            .into_first_result()
            .await
            .context("reading image record rows")?;

        let assembled = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;
        let (records, skipped) = keep_usable(assembled);
        self.skipped = skipped;
        info!(count = records.len(), skipped, "image records fetched");
        Ok(records)
    }

    fn skipped(&self) -> usize {
        self.skipped
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await.context("closing SQL Server connection")?;
            debug!("SQL Server connection closed");
        }
        Ok(())
    }
}

fn text(row: &Row, column: &str) -> Result<Option<String>> {
    let value: Option<&str> = row
        .try_get(column)
        .with_context(|| format!("column {column} is not text"))?;
    Ok(value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
}

fn record_from_row(row: &Row) -> Result<Option<ImageRecord>> {
    Ok(assemble_record(
        text(row, "ProductId")?,
        text(row, "MediaId")?,
        text(row, "Url")?,
        text(row, "MediaResourceId")?,
        text(row, "SortOrder")?,
        text(row, "ContentType")?,
    ))
}

/// Drop rows that did not assemble into a record, counting them.
fn keep_usable(rows: Vec<Option<ImageRecord>>) -> (Vec<ImageRecord>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (idx, row) in rows.into_iter().enumerate() {
        match row {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                warn!(row = idx, "skipping row without product id, media id or URL");
            }
        }
    }
    (records, skipped)
}

/// Rows missing any of the identifying columns cannot be migrated.
fn assemble_record(
    product_id: Option<String>,
    media_id: Option<String>,
    url: Option<String>,
    media_resource_id: Option<String>,
    order: Option<String>,
    content_type: Option<String>,
) -> Option<ImageRecord> {
    let (product_id, media_id, source_url) = (product_id?, media_id?, url?);
    let file_name = file_name_from_url(&source_url);
    Some(ImageRecord {
        product_id,
        media_id,
        source_url,
        file_name,
        media_resource_id,
        order,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_complete_rows() {
        let r = assemble_record(
            Some("1042".into()),
            Some("77".into()),
            Some("https://cdn.example.com/p/1042/front.jpg".into()),
            Some("68920485-d222-4ff0-b947-e0340d77b56a".into()),
            Some("1".into()),
            Some("image/jpeg".into()),
        )
        .unwrap();
        assert_eq!(r.file_name, "front.jpg");
        assert_eq!(r.order.as_deref(), Some("1"));
        assert_eq!(r.content_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn rows_without_url_are_dropped() {
        assert!(assemble_record(Some("1".into()), Some("2".into()), None, None, None, None).is_none());
        assert!(assemble_record(None, Some("2".into()), Some("https://x/y.png".into()), None, None, None).is_none());
    }

    #[test]
    fn unusable_rows_are_counted_not_returned() {
        let complete = || {
            assemble_record(
                Some("1".into()),
                Some("2".into()),
                Some("https://cdn.example.com/a.png".into()),
                None,
                None,
                None,
            )
        };
        let missing_url = assemble_record(Some("3".into()), Some("4".into()), None, None, None, None);
        let (records, skipped) = keep_usable(vec![complete(), missing_url, complete()]);
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn query_is_parameterized() {
        assert!(ACTIVE_IMAGES_SQL.contains("TOP (@P1)"));
        assert!(ACTIVE_IMAGES_SQL.contains("m.MediaResourceId = @P2"));
        assert!(ACTIVE_IMAGES_SQL.contains("ORDER BY"));
    }
}
