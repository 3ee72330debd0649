use crate::error::SweepResult;
use crate::sweep::archive::ZipSink;
use crate::sweep::grouper::{Batch, BatchId};
use crate::sweep::progress::BatchProgress;
use crate::sweep::relocate::FolderSink;
use crate::sweep::walker::FileRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// One unit of work handed to a worker: a range over a shared record list.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: BatchId,
    pub records: Arc<[FileRecord]>,
    pub batch: Batch,
}

impl BatchJob {
    pub fn new(subdir: impl Into<String>, seq: u64, records: Arc<[FileRecord]>, batch: Batch) -> Self {
        debug_assert!(!batch.is_empty(), "empty batch {batch:?}");
        debug_assert!(batch.end <= records.len(), "batch {batch:?} past end of list");
        Self {
            id: BatchId::for_batch(subdir, seq, &batch),
            records,
            batch,
        }
    }

    pub fn members(&self) -> &[FileRecord] {
        &self.records[self.batch.range()]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch: BatchId,
    pub destination: PathBuf,
    pub files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    /// Compress each batch into a fresh zip container, deleting sources.
    #[default]
    Archive,
    /// Move each batch into a per-month folder.
    Relocate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixStrategy {
    /// Random v4 uuid per container.
    #[default]
    Uuid,
    /// Worker thread name plus the run-wide batch sequence number.
    Worker,
}

impl SinkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Relocate => "relocate",
        }
    }
}

impl SuffixStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SuffixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" | "zip" => Ok(Self::Archive),
            "relocate" | "move" => Ok(Self::Relocate),
            other => Err(format!("unknown mode `{other}`: use `archive` or `relocate`")),
        }
    }
}

impl FromStr for SuffixStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" => Ok(Self::Uuid),
            "worker" => Ok(Self::Worker),
            other => Err(format!("unknown suffix `{other}`: use `uuid` or `worker`")),
        }
    }
}

/// Terminal action for one batch. Implementations must only touch the files
/// inside `job.members()` and their own destination.
pub trait BatchSink: Send + Sync {
    fn mode(&self) -> SinkMode;

    /// Destination name as it would appear under the target, for planning.
    fn planned_destination(&self, job: &BatchJob) -> String;

    fn process(&self, job: &BatchJob, progress: &BatchProgress) -> SweepResult<BatchOutcome>;
}

pub fn build_sink(mode: SinkMode, target: &Path, suffix: SuffixStrategy) -> Arc<dyn BatchSink> {
    match mode {
        SinkMode::Archive => Arc::new(ZipSink::new(target, suffix)),
        SinkMode::Relocate => Arc::new(FolderSink::new(target)),
    }
}
