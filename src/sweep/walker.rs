use crate::error::SweepError;
use crate::sweep::month::EffectiveMonth;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Path below the sweep root; used as the archive entry name.
    pub relative: PathBuf,
    pub month: EffectiveMonth,
}

#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    /// Sorted ascending by month; same-month records keep discovery order.
    pub records: Vec<FileRecord>,
    pub skipped: usize,
}

fn skip(path: PathBuf, source: io::Error, skipped: &mut usize) {
    let err = SweepError::Discovery { path, source };
    warn!(code = err.code().as_str(), "skipping entry: {err}");
    *skipped += 1;
}

/// Recursively list regular files under `dir`, tagging each with its
/// effective month. Entries that disappear or cannot be stat'ed mid-walk are
/// skipped and counted, never fatal.
pub fn list_files(dir: &Path, root: &Path) -> WalkOutcome {
    let mut out = WalkOutcome::default();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| dir.to_path_buf());
                skip(path, io::Error::from(err), &mut out.skipped);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        let modified = match path.symlink_metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                skip(path, err, &mut out.skipped);
                continue;
            }
        };

        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        out.records.push(FileRecord {
            month: EffectiveMonth::from_system_time(modified),
            relative,
            path,
        });
    }

    out.records.sort_by_key(|record| record.month);
    debug!(
        dir = %dir.display(),
        files = out.records.len(),
        skipped = out.skipped,
        "walk finished"
    );
    out
}
