pub mod aggregate;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod outcome;
pub mod records;
pub mod report;
pub mod transfer;

pub mod util {
    pub mod env;
}

pub use config::AppConfig;
pub use error::{SetupError, StepError};
pub use outcome::{BatchSummary, TransferBatch, TransferOutcome, TransferStatus};
pub use records::{ImageRecord, RecordSource};
