//! Local staging of downloaded bytes.
//!
//! Every record gets its own file, `<product_id>_<media_id>_<file_name>`,
//! under the download directory. Files are kept after the run.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::error::StepError;
use crate::records::ImageRecord;

const SEPARATOR: &str = "_";

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Use `root` as staging directory, creating it if needed.
    pub async fn create(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating download directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Staged file name for a record. Distinct product/media pairs never collide.
    pub fn staged_name(record: &ImageRecord) -> String {
        [
            sanitize(&record.product_id),
            sanitize(&record.media_id),
            sanitize(last_segment(&record.file_name)),
        ]
        .join(SEPARATOR)
    }

    pub fn path_for(&self, record: &ImageRecord) -> PathBuf {
        self.root.join(Self::staged_name(record))
    }

    /// Write `bytes` for `record`, replacing an earlier attempt's file.
    ///
    /// Data goes to a `.part` sibling first and is renamed into place, so a
    /// failed write never leaves a truncated image under the final name.
    pub async fn write(&self, record: &ImageRecord, bytes: &[u8]) -> Result<PathBuf, StepError> {
        let path = self.path_for(record);
        let mut part = path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let io = |what: &str, e: std::io::Error| {
            StepError::Staging(format!("{what} {}: {e}", part.display()))
        };
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| io("creating", e))?;
        file.write_all(bytes).await.map_err(|e| io("writing", e))?;
        file.flush().await.map_err(|e| io("flushing", e))?;
        drop(file);
        tokio::fs::rename(&part, &path)
            .await
            .map_err(|e| StepError::Staging(format!("renaming into {}: {e}", path.display())))?;
        Ok(path)
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Keep names to one path component.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == ':' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "image".to_string(),
        _ => cleaned,
    }
}
