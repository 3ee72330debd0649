use crate::error::{SweepError, SweepResult};
use crate::sweep::progress::BatchProgress;
use crate::sweep::sink::{BatchJob, BatchOutcome, BatchSink, SinkMode};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub struct FolderSink {
    target: PathBuf,
}

impl FolderSink {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
        }
    }
}

/// `relative` with any root or `..` parts dropped, safe to join below a folder.
fn nested_path(relative: &Path) -> PathBuf {
    relative
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect()
}

/// Copy into a destination that must not exist yet, keeping the mtime so
/// reruns group the file the same way.
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let modified = source.metadata()?.modified()?;
    let mut dest = File::options().write(true).create_new(true).open(to)?;
    if let Err(err) = io::copy(&mut source, &mut dest).and_then(|_| dest.set_modified(modified)) {
        drop(dest);
        let _ = fs::remove_file(to);
        return Err(err);
    }
    Ok(())
}

/// Move without ever replacing an existing destination: `AlreadyExists` is
/// returned instead. Hard link + unlink where the filesystem allows it, else
/// an exclusive copy + unlink.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if from == to {
        return Ok(());
    }

    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Err(err),
        Err(err) => {
            debug!("hard link {} failed ({err}); copying", to.display());
            copy_new(from, to)?;
        }
    }
    fs::remove_file(from)
}

impl BatchSink for FolderSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Relocate
    }

    fn planned_destination(&self, job: &BatchJob) -> String {
        job.batch.month.folder_name()
    }

    fn process(&self, job: &BatchJob, progress: &BatchProgress) -> SweepResult<BatchOutcome> {
        let folder = self.target.join(job.batch.month.folder_name());
        // Pre-existing folder is fine; a file in its place is not.
        fs::create_dir_all(&folder).map_err(|source| SweepError::TargetIo {
            batch: job.id.clone(),
            operation: "create month folder",
            path: folder.clone(),
            source,
        })?;
        info!(batch = %job.id, folder = %folder.display(), "relocate into folder");

        for (offset, record) in job.members().iter().enumerate() {
            let index = job.batch.start + offset;
            let fail = |source: io::Error| SweepError::PartialBatch {
                batch: job.id.clone(),
                index,
                path: record.path.clone(),
                source,
            };

            // Same layout below the month folder as below the sweep root, so
            // equal file names from different directories never meet.
            let destination = folder.join(nested_path(&record.relative));
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(fail)?;
            }

            debug!(batch = %job.id, index, "move   file: {}", record.path.display());
            move_file(&record.path, &destination).map_err(|err| {
                if err.kind() == ErrorKind::AlreadyExists {
                    fail(io::Error::new(
                        ErrorKind::AlreadyExists,
                        format!("destination {} already exists", destination.display()),
                    ))
                } else {
                    fail(err)
                }
            })?;
            progress.advance(offset, &record.path);
        }

        info!(
            batch = %job.id,
            files = job.batch.len(),
            "already done {}",
            folder.display()
        );
        Ok(BatchOutcome {
            batch: job.id.clone(),
            destination: folder,
            files: job.batch.len(),
        })
    }
}
