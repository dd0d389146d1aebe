//! Per-record results and the ordered batch built from them.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::records::ImageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferStatus {
    Succeeded,
    FailedDownload,
    FailedUpload,
    FailedOther,
}

impl TransferStatus {
    pub fn is_success(self) -> bool {
        matches!(self, TransferStatus::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Succeeded => "Succeeded",
            TransferStatus::FailedDownload => "FailedDownload",
            TransferStatus::FailedUpload => "FailedUpload",
            TransferStatus::FailedOther => "FailedOther",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one record's attempt sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub record: ImageRecord,
    pub status: TransferStatus,
    pub attempts: u32,
    /// Message of the last error; `None` on success.
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    /// Where the last successful download was staged.
    pub staged_path: Option<PathBuf>,
    /// Truncated body of the last upload response, when there was one.
    pub response_excerpt: Option<String>,
}

/// All outcomes of one run, in input order.
#[derive(Debug, Clone, Default)]
pub struct TransferBatch {
    outcomes: Vec<TransferOutcome>,
}

impl TransferBatch {
    pub(crate) fn from_ordered(outcomes: Vec<TransferOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferOutcome> {
        self.outcomes.iter()
    }

    pub fn outcomes(&self) -> &[TransferOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> BatchSummary {
        let mut s = BatchSummary {
            total: self.outcomes.len(),
            ..BatchSummary::default()
        };
        for o in &self.outcomes {
            s.total_attempts += u64::from(o.attempts);
            match o.status {
                TransferStatus::Succeeded => s.succeeded += 1,
                TransferStatus::FailedDownload => s.failed_download += 1,
                TransferStatus::FailedUpload => s.failed_upload += 1,
                TransferStatus::FailedOther => s.failed_other += 1,
            }
        }
        s
    }
}

impl<'a> IntoIterator for &'a TransferBatch {
    type Item = &'a TransferOutcome;
    type IntoIter = std::slice::Iter<'a, TransferOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_download: usize,
    pub failed_upload: usize,
    pub failed_other: usize,
    pub total_attempts: u64,
    /// Source rows dropped before the transfer because they were unusable.
    pub skipped: usize,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failed_download + self.failed_upload + self.failed_other
    }

    /// Every record failed the same way: most likely a bad credential or a dead endpoint.
    pub fn looks_systemic(&self) -> bool {
        self.total > 1
            && self.succeeded == 0
            && [self.failed_download, self.failed_upload, self.failed_other].contains(&self.total)
    }
}
