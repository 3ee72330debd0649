use crate::error::SweepError;
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE: &str = ".month-sweep.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    build_uuid: String,
    started_at: String,
}

/// Exclusive advisory lock on the target directory, released on drop.
///
/// Two runs against the same target would race for the same container and
/// folder names, so only one may hold it at a time.
#[derive(Debug)]
pub struct SweepLock {
    file: File,
    path: PathBuf,
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    let payload: LockPayload = serde_json::from_str(raw.trim()).ok()?;
    Some(format!(
        "pid={} build={} since {}",
        payload.pid, payload.build_uuid, payload.started_at
    ))
}

fn write_payload(file: &mut File, line: &str) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{line}")?;
    file.sync_all()
}

impl SweepLock {
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = target.join(LOCK_FILE);
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_holder(&mut file);
            return Err(SweepError::Locked { path, holder }.into());
        }

        let payload = LockPayload {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            started_at: Utc::now().to_rfc3339(),
        };
        let line = serde_json::to_string(&payload)?;
        write_payload(&mut file, &line)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "sweep lock acquired");

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SweepLock {
    fn drop(&mut self) {
        // Truncate instead of unlinking: another process may already hold an
        // open handle to this inode and be waiting on it.
        if let Err(err) = self.file.set_len(0) {
            warn!(path = %self.path.display(), "failed to clear sweep lock: {err}");
        }
        let _ = FileExt::unlock(&self.file);
    }
}

/// Holder recorded in the lock file under `target`, if a run is active.
pub fn lock_holder(target: &Path) -> Option<String> {
    let mut file = File::open(target.join(LOCK_FILE)).ok()?;
    read_holder(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = tempdir().expect("tempdir");
        let first = SweepLock::acquire(tmp.path()).expect("first lock");
        assert_eq!(first.path(), tmp.path().join(LOCK_FILE));

        let err = SweepLock::acquire(tmp.path()).expect_err("second lock");
        let sweep_err = err.downcast_ref::<SweepError>().expect("sweep error");
        assert!(matches!(sweep_err, SweepError::Locked { holder: Some(_), .. }));
        assert!(
            err.to_string()
                .contains(&format!("pid={}", std::process::id()))
        );
    }

    #[test]
    fn lock_is_reusable_after_drop() {
        let tmp = tempdir().expect("tempdir");
        drop(SweepLock::acquire(tmp.path()).expect("first lock"));
        assert!(lock_holder(tmp.path()).is_none());
        let again = SweepLock::acquire(tmp.path()).expect("second lock");
        assert!(lock_holder(tmp.path()).is_some());
        drop(again);
    }
}
