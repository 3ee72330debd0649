use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sweep::grouper::BatchId;

pub type SweepResult<T> = Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to stat {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("batch {batch}: container {} already exists", path.display())]
    ContainerCollision { batch: BatchId, path: PathBuf },
    #[error("batch {batch}: failed at index {index} ({}): {source}", path.display())]
    PartialBatch {
        batch: BatchId,
        index: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("batch {batch}: {operation} failed for {}: {source}", path.display())]
    TargetIo {
        batch: BatchId,
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("batch {batch}: timed out after {after_secs}s")]
    BatchTimeout { batch: BatchId, after_secs: u64 },
    #[error("batch {batch}: cancelled before start")]
    Cancelled { batch: BatchId },
    #[error("batch {batch}: worker exited without reporting a result")]
    WorkerLost { batch: BatchId },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("sweep lock {} is held by another instance{}", path.display(), holder.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    Locked {
        path: PathBuf,
        holder: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepErrorCode {
    E001Discovery,
    E002ContainerCollision,
    E003PartialBatch,
    E004BatchTimeout,
    E005Cancelled,
    E006InvalidConfig,
    E007Locked,
    E008WorkerLost,
}

impl SweepErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Discovery => "E001_DISCOVERY",
            Self::E002ContainerCollision => "E002_CONTAINER_COLLISION",
            Self::E003PartialBatch => "E003_PARTIAL_BATCH",
            Self::E004BatchTimeout => "E004_BATCH_TIMEOUT",
            Self::E005Cancelled => "E005_CANCELLED",
            Self::E006InvalidConfig => "E006_INVALID_CONFIG",
            Self::E007Locked => "E007_LOCKED",
            Self::E008WorkerLost => "E008_WORKER_LOST",
        }
    }
}

impl SweepError {
    pub fn code(&self) -> SweepErrorCode {
        match self {
            Self::Discovery { .. } => SweepErrorCode::E001Discovery,
            Self::ContainerCollision { .. } => SweepErrorCode::E002ContainerCollision,
            // A failed container/folder write leaves the batch as partial as a member failure does.
            Self::PartialBatch { .. } | Self::TargetIo { .. } => SweepErrorCode::E003PartialBatch,
            Self::BatchTimeout { .. } => SweepErrorCode::E004BatchTimeout,
            Self::Cancelled { .. } => SweepErrorCode::E005Cancelled,
            Self::InvalidConfig(_) => SweepErrorCode::E006InvalidConfig,
            Self::Locked { .. } => SweepErrorCode::E007Locked,
            Self::WorkerLost { .. } => SweepErrorCode::E008WorkerLost,
        }
    }
}
