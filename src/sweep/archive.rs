use crate::error::{SweepError, SweepResult};
use crate::sweep::progress::BatchProgress;
use crate::sweep::sink::{BatchJob, BatchOutcome, BatchSink, SinkMode, SuffixStrategy};
use crate::sweep::walker::FileRecord;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::SystemTime;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const ZIP32_LIMIT: u64 = u32::MAX as u64;

pub struct ZipSink {
    target: PathBuf,
    suffix: SuffixStrategy,
}

impl ZipSink {
    pub fn new(target: &Path, suffix: SuffixStrategy) -> Self {
        Self {
            target: target.to_path_buf(),
            suffix,
        }
    }

    fn suffix_for(&self, job: &BatchJob) -> String {
        match self.suffix {
            SuffixStrategy::Uuid => uuid::Uuid::new_v4().simple().to_string(),
            SuffixStrategy::Worker => format!("{}-{}", worker_label(), job.id.seq),
        }
    }

    fn container_name(job: &BatchJob, suffix: &str) -> String {
        format!("{}_{suffix}.zip", job.batch.month.container_stem())
    }
}

/// Current thread name reduced to filename-safe characters.
fn worker_label() -> String {
    let current = thread::current();
    let label = current
        .name()
        .unwrap_or("worker")
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect::<String>();
    label.trim_matches('-').to_string()
}

/// Archive entry name: the record's path below the sweep root, `/`-separated.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn zip_timestamp(time: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = time.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn add_member<W: Write + Seek>(zip: &mut ZipWriter<W>, record: &FileRecord) -> io::Result<()> {
    let mut source = File::open(&record.path)?;
    let meta = source.metadata()?;

    let mut options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(meta.len() >= ZIP32_LIMIT);
    if let Some(stamp) = meta.modified().ok().and_then(zip_timestamp) {
        options = options.last_modified_time(stamp);
    }

    zip.start_file(entry_name(&record.relative), options)
        .map_err(io::Error::from)?;
    io::copy(&mut source, zip)?;
    Ok(())
}

impl BatchSink for ZipSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Archive
    }

    fn planned_destination(&self, job: &BatchJob) -> String {
        let placeholder = match self.suffix {
            SuffixStrategy::Uuid => "<uuid>".to_string(),
            SuffixStrategy::Worker => format!("<worker>-{}", job.id.seq),
        };
        Self::container_name(job, &placeholder)
    }

    fn process(&self, job: &BatchJob, progress: &BatchProgress) -> SweepResult<BatchOutcome> {
        let container = self
            .target
            .join(Self::container_name(job, &self.suffix_for(job)));

        let file = match File::options()
            .write(true)
            .create_new(true)
            .open(&container)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(SweepError::ContainerCollision {
                    batch: job.id.clone(),
                    path: container,
                });
            }
            Err(source) => {
                return Err(SweepError::TargetIo {
                    batch: job.id.clone(),
                    operation: "create container",
                    path: container,
                    source,
                });
            }
        };
        info!(batch = %job.id, container = %container.display(), "create zip");

        let mut zip = ZipWriter::new(file);
        for (offset, record) in job.members().iter().enumerate() {
            let index = job.batch.start + offset;
            let fail = |source: io::Error| SweepError::PartialBatch {
                batch: job.id.clone(),
                index,
                path: record.path.clone(),
                source,
            };

            debug!(batch = %job.id, index, "zip    file: {}", record.path.display());
            add_member(&mut zip, record).map_err(fail)?;
            debug!(batch = %job.id, index, "remove file: {}", record.path.display());
            fs::remove_file(&record.path).map_err(fail)?;
            progress.advance(offset, &record.path);
        }

        zip.finish().map_err(|err| SweepError::TargetIo {
            batch: job.id.clone(),
            operation: "finish container",
            path: container.clone(),
            source: io::Error::from(err),
        })?;
        info!(
            batch = %job.id,
            files = job.batch.len(),
            "already done {}",
            container.display()
        );

        Ok(BatchOutcome {
            batch: job.id.clone(),
            destination: container,
            files: job.batch.len(),
        })
    }
}
