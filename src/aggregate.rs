//! Fan-in of per-record outcomes.
//!
//! The aggregator hands out exactly one [`OutcomeSlot`] per input record.
//! Slots are not `Clone` and `record` takes them by value, so a record can
//! report at most once; `finalize` checks that every slot did report. The
//! slot table doubles as the per-record state machine:
//!
//! ```text
//! Pending -> InFlight(1) -> { Retrying(n) -> InFlight(n) }* -> Succeeded | Failed
//! ```

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::outcome::{TransferBatch, TransferOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    InFlight { attempt: u32 },
    /// Backing off before `attempt`.
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Succeeded | RecordState::Failed)
    }

    pub fn can_transition_to(self, next: RecordState) -> bool {
        use RecordState::*;
        match (self, next) {
            (Pending, InFlight { attempt }) => attempt == 1,
            (InFlight { attempt: cur }, Retrying { attempt: next }) => next == cur + 1,
            (Retrying { attempt: cur }, InFlight { attempt: next }) => next == cur,
            (InFlight { .. }, Succeeded | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Pending => f.write_str("pending"),
            RecordState::InFlight { attempt } => write!(f, "in-flight(attempt {attempt})"),
            RecordState::Retrying { attempt } => write!(f, "retrying(attempt {attempt})"),
            RecordState::Succeeded => f.write_str("succeeded"),
            RecordState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AggregateError {
    #[error("slot {index} does not belong to this batch of {len}")]
    UnknownSlot { index: usize, len: usize },

    #[error("record {index}: invalid transition {from} -> {to}")]
    InvalidTransition {
        index: usize,
        from: RecordState,
        to: RecordState,
    },

    #[error("{} record(s) never reported an outcome: {missing:?}", missing.len())]
    Missing { missing: Vec<usize> },
}

/// Right to report the outcome of the record at `index`, exactly once.
#[derive(Debug)]
pub struct OutcomeSlot {
    index: usize,
}

impl OutcomeSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Progress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

struct Entry {
    state: RecordState,
    outcome: Option<TransferOutcome>,
}

pub struct ResultAggregator {
    entries: Mutex<Vec<Entry>>,
}

impl ResultAggregator {
    /// Aggregator for `len` records plus one slot per record, in input order.
    pub fn new(len: usize) -> (Self, Vec<OutcomeSlot>) {
        let entries = (0..len)
            .map(|_| Entry {
                state: RecordState::Pending,
                outcome: None,
            })
            .collect();
        let slots = (0..len).map(|index| OutcomeSlot { index }).collect();
        (
            Self {
                entries: Mutex::new(entries),
            },
            slots,
        )
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        // Entries stay consistent across a panic elsewhere; keep going.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move a record to a non-terminal state.
    pub fn transition(&self, slot: &OutcomeSlot, next: RecordState) -> Result<(), AggregateError> {
        let mut entries = self.lock();
        let len = entries.len();
        let entry = entries
            .get_mut(slot.index)
            .ok_or(AggregateError::UnknownSlot { index: slot.index, len })?;
        if next.is_terminal() || !entry.state.can_transition_to(next) {
            return Err(AggregateError::InvalidTransition {
                index: slot.index,
                from: entry.state,
                to: next,
            });
        }
        entry.state = next;
        Ok(())
    }

    /// Store a record's outcome and move it to its terminal state.
    pub fn record(
        &self,
        slot: OutcomeSlot,
        outcome: TransferOutcome,
    ) -> Result<Progress, AggregateError> {
        let mut entries = self.lock();
        let len = entries.len();
        let entry = entries
            .get_mut(slot.index)
            .ok_or(AggregateError::UnknownSlot { index: slot.index, len })?;
        let terminal = if outcome.status.is_success() {
            RecordState::Succeeded
        } else {
            RecordState::Failed
        };
        if !entry.state.can_transition_to(terminal) {
            return Err(AggregateError::InvalidTransition {
                index: slot.index,
                from: entry.state,
                to: terminal,
            });
        }
        entry.state = terminal;
        entry.outcome = Some(outcome);
        Ok(tally(&entries))
    }

    pub fn progress(&self) -> Progress {
        tally(&self.lock())
    }

    /// Outcomes in input order. Fails if any record never reported.
    pub fn finalize(self) -> Result<TransferBatch, AggregateError> {
        let entries = self.entries.into_inner().unwrap_or_else(|e| e.into_inner());
        let missing: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.outcome.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(AggregateError::Missing { missing });
        }
        let outcomes = entries.into_iter().filter_map(|e| e.outcome).collect();
        Ok(TransferBatch::from_ordered(outcomes))
    }
}

fn tally(entries: &[Entry]) -> Progress {
    let mut p = Progress {
        total: entries.len(),
        ..Progress::default()
    };
    for e in entries {
        match e.state {
            RecordState::Pending => p.pending += 1,
            RecordState::InFlight { .. } => p.in_flight += 1,
            RecordState::Retrying { .. } => p.retrying += 1,
            RecordState::Succeeded => p.succeeded += 1,
            RecordState::Failed => p.failed += 1,
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::TransferStatus;
    use crate::records::ImageRecord;
    use std::sync::Arc;

    fn outcome(id: usize, status: TransferStatus) -> TransferOutcome {
        TransferOutcome {
            record: ImageRecord::new(id.to_string(), "m", "https://x.example/a.jpg"),
            status,
            attempts: 1,
            error_detail: None,
            duration_ms: 0,
            staged_path: None,
            response_excerpt: None,
        }
    }

    #[test]
    fn state_machine_allows_only_documented_edges() {
        use RecordState::*;
        assert!(Pending.can_transition_to(InFlight { attempt: 1 }));
        assert!(!Pending.can_transition_to(InFlight { attempt: 2 }));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(InFlight { attempt: 1 }.can_transition_to(Retrying { attempt: 2 }));
        assert!(!InFlight { attempt: 1 }.can_transition_to(Retrying { attempt: 3 }));
        assert!(Retrying { attempt: 2 }.can_transition_to(InFlight { attempt: 2 }));
        assert!(InFlight { attempt: 2 }.can_transition_to(Failed));
        assert!(!Retrying { attempt: 2 }.can_transition_to(Succeeded));
        for terminal in [Succeeded, Failed] {
            assert!(!terminal.can_transition_to(InFlight { attempt: 1 }));
            assert!(!terminal.can_transition_to(Failed));
        }
    }

    #[test]
    fn finalize_restores_input_order() {
        let (agg, slots) = ResultAggregator::new(3);
        let mut slots: Vec<_> = slots.into_iter().map(Some).collect();
        for idx in [2usize, 0, 1] {
            let slot = slots[idx].take().unwrap();
            agg.transition(&slot, RecordState::InFlight { attempt: 1 }).unwrap();
            agg.record(slot, outcome(idx, TransferStatus::Succeeded)).unwrap();
        }
        let batch = agg.finalize().unwrap();
        let ids: Vec<_> = batch.iter().map(|o| o.record.product_id.clone()).collect();
        assert_eq!(ids, ["0", "1", "2"]);
    }

    #[test]
    fn finalize_reports_missing_records() {
        let (agg, mut slots) = ResultAggregator::new(2);
        let first = slots.remove(0);
        agg.transition(&first, RecordState::InFlight { attempt: 1 }).unwrap();
        agg.record(first, outcome(0, TransferStatus::FailedOther)).unwrap();
        assert_eq!(
            agg.finalize().unwrap_err(),
            AggregateError::Missing { missing: vec![1] }
        );
    }

    #[test]
    fn record_requires_in_flight() {
        let (agg, mut slots) = ResultAggregator::new(1);
        let slot = slots.remove(0);
        let err = agg.record(slot, outcome(0, TransferStatus::Succeeded)).unwrap_err();
        assert!(matches!(err, AggregateError::InvalidTransition { .. }));
    }

    #[test]
    fn transition_cannot_reach_terminal_states() {
        let (agg, slots) = ResultAggregator::new(1);
        agg.transition(&slots[0], RecordState::InFlight { attempt: 1 }).unwrap();
        assert!(agg.transition(&slots[0], RecordState::Succeeded).is_err());
        let p = agg.progress();
        assert_eq!((p.in_flight, p.completed()), (1, 0));
    }

    #[test]
    fn progress_tracks_states() {
        let (agg, mut slots) = ResultAggregator::new(3);
        let a = slots.remove(0);
        agg.transition(&a, RecordState::InFlight { attempt: 1 }).unwrap();
        agg.transition(&a, RecordState::Retrying { attempt: 2 }).unwrap();
        let b = slots.remove(0);
        agg.transition(&b, RecordState::InFlight { attempt: 1 }).unwrap();
        let p = agg.record(b, outcome(1, TransferStatus::FailedUpload)).unwrap();
        assert_eq!(
            p,
            Progress { total: 3, pending: 1, in_flight: 0, retrying: 1, succeeded: 0, failed: 1 }
        );
        assert_eq!(p.completed(), 1);
    }

    #[tokio::test]
    async fn concurrent_records_are_all_kept() {
        let n = 64;
        let (agg, slots) = ResultAggregator::new(n);
        let agg = Arc::new(agg);
        let mut handles = Vec::new();
        for slot in slots.into_iter().rev() {
            let agg = agg.clone();
            handles.push(tokio::spawn(async move {
                let idx = slot.index();
                agg.transition(&slot, RecordState::InFlight { attempt: 1 }).unwrap();
                tokio::task::yield_now().await;
                agg.record(slot, outcome(idx, TransferStatus::Succeeded)).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let agg = Arc::try_unwrap(agg).ok().unwrap();
        let batch = agg.finalize().unwrap();
        assert_eq!(batch.len(), n);
        for (i, o) in batch.iter().enumerate() {
            assert_eq!(o.record.product_id, i.to_string());
        }
    }
}
