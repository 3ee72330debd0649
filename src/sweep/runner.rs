use crate::error::SweepError;
use crate::sweep::config::SweepConfig;
use crate::sweep::dispatch::{AbortFlag, AbortReason, DispatchConfig, Dispatcher};
use crate::sweep::grouper::MonthGrouper;
use crate::sweep::month::{EffectiveMonth, is_month_folder_name};
use crate::sweep::progress::ProgressHub;
use crate::sweep::sink::{BatchJob, BatchOutcome, BatchSink, build_sink};
use crate::sweep::walker::{FileRecord, list_files};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything one run needs; replaces process-wide globals.
#[derive(Debug, Clone)]
pub struct SweepContext {
    pub root: PathBuf,
    pub target: PathBuf,
    pub config: SweepConfig,
    pub current_month: EffectiveMonth,
    pub abort: AbortFlag,
}

impl SweepContext {
    /// Resolve and validate `root` and `target`. "Now" is captured here once.
    pub fn new(root: &Path, target: &Path, config: SweepConfig) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("root {} is not accessible", root.display()))?;
        let target = fs::canonicalize(target)
            .with_context(|| format!("target {} is not accessible", target.display()))?;
        if !root.is_dir() {
            return Err(SweepError::InvalidConfig(format!(
                "root {} is not a directory",
                root.display()
            ))
            .into());
        }
        if !target.is_dir() {
            return Err(SweepError::InvalidConfig(format!(
                "target {} is not a directory",
                target.display()
            ))
            .into());
        }
        if target != root && target.starts_with(&root) {
            return Err(SweepError::InvalidConfig(format!(
                "target {} lies inside root {}; its output would be swept again",
                target.display(),
                root.display()
            ))
            .into());
        }

        Ok(Self {
            root,
            target,
            config,
            current_month: EffectiveMonth::current(),
            abort: AbortFlag::default(),
        })
    }

    fn grouper(&self) -> MonthGrouper {
        MonthGrouper::new(self.config.max_batch_size, self.current_month)
    }

    fn sink(&self) -> Arc<dyn BatchSink> {
        build_sink(self.config.mode, &self.target, self.config.suffix)
    }
}

/// Immediate subdirectories of `root`, sorted by name. Loose files at the root
/// are not units of work.
pub fn list_units(root: &Path, target: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", root.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            continue;
        }
        if root == target && entry.file_name().to_str().is_some_and(is_month_folder_name) {
            continue;
        }
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}

fn unit_label(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

fn held_back(records: &[FileRecord], current: EffectiveMonth) -> usize {
    records.iter().filter(|r| r.month == current).count()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub subdirs: usize,
    pub files_discovered: usize,
    pub entries_skipped: usize,
    pub files_held_back: usize,
    pub batches_submitted: usize,
    pub files_processed: usize,
    pub succeeded: Vec<BatchOutcome>,
    pub failed: Vec<String>,
    pub cancelled: Vec<String>,
    pub interrupted: bool,
}

impl SweepSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && !self.interrupted
    }
}

/// Walk every unit, stream its eligible batches to the pool, then wait for
/// all of them.
pub fn run(ctx: &SweepContext) -> Result<SweepSummary> {
    info!(root = %ctx.root.display(), "process root dir");
    info!(target = %ctx.target.display(), mode = %ctx.config.mode, "move to target dir");

    let mut dispatcher = Dispatcher::spawn(
        DispatchConfig {
            workers: ctx.config.workers,
            batch_timeout: ctx.config.batch_timeout_secs.map(Duration::from_secs),
        },
        ctx.sink(),
        ProgressHub::new(ctx.config.progress),
        ctx.abort.clone(),
    )
    .context("failed to start worker pool")?;

    let grouper = ctx.grouper();
    let mut summary = SweepSummary::default();

    for dir in list_units(&ctx.root, &ctx.target)? {
        if ctx.abort.is_tripped() {
            warn!("abort requested; remaining subdirectories are not walked");
            break;
        }
        let label = unit_label(&dir);
        info!(subdir = %label, "handle files at path: {}", dir.display());

        let walk = list_files(&dir, &ctx.root);
        summary.subdirs += 1;
        summary.files_discovered += walk.records.len();
        summary.entries_skipped += walk.skipped;
        summary.files_held_back += held_back(&walk.records, grouper.current_month());

        let records: Arc<[FileRecord]> = walk.records.into();
        for batch in grouper.eligible(&records) {
            if ctx.abort.is_tripped() {
                break;
            }
            let seq = dispatcher.next_seq();
            dispatcher.submit(BatchJob::new(label.clone(), seq, Arc::clone(&records), batch));
            summary.batches_submitted += 1;
        }
    }

    info!(pending = dispatcher.pending(), "waiting for pending batches");
    let report = dispatcher.finish();

    summary.files_processed = report.succeeded.iter().map(|o| o.files).sum();
    summary.succeeded = report.succeeded;
    summary.failed = report.failed.iter().map(ToString::to_string).collect();
    summary.cancelled = report.cancelled.iter().map(ToString::to_string).collect();
    summary.interrupted = ctx.abort.reason() == Some(AbortReason::Interrupted);

    info!(
        batches = summary.batches_submitted,
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        cancelled = summary.cancelled.len(),
        files = summary.files_processed,
        "sweep finished"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedBatch {
    pub batch: String,
    pub files: usize,
    pub destination: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepPlan {
    pub subdirs: usize,
    pub files_discovered: usize,
    pub entries_skipped: usize,
    pub files_held_back: usize,
    pub batches: Vec<PlannedBatch>,
}

/// Same walk and grouping as [`run`], without touching any file.
pub fn plan(ctx: &SweepContext) -> Result<SweepPlan> {
    let grouper = ctx.grouper();
    let sink = ctx.sink();
    let mut out = SweepPlan::default();
    let mut seq = 0u64;

    for dir in list_units(&ctx.root, &ctx.target)? {
        let label = unit_label(&dir);
        let walk = list_files(&dir, &ctx.root);
        out.subdirs += 1;
        out.files_discovered += walk.records.len();
        out.entries_skipped += walk.skipped;
        out.files_held_back += held_back(&walk.records, grouper.current_month());

        let records: Arc<[FileRecord]> = walk.records.into();
        for batch in grouper.eligible(&records) {
            let job = BatchJob::new(label.clone(), seq, Arc::clone(&records), batch);
            seq += 1;
            out.batches.push(PlannedBatch {
                batch: job.id.to_string(),
                files: job.batch.len(),
                destination: sink.planned_destination(&job),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::sink::SinkMode;
    use crate::sweep::test_support::touch;
    use std::num::NonZeroUsize;
    use tempfile::tempdir;

    fn context(root: &Path, target: &Path, mode: SinkMode, cap: Option<usize>) -> SweepContext {
        let config = SweepConfig {
            mode,
            workers: NonZeroUsize::new(2).expect("non-zero"),
            max_batch_size: cap.and_then(NonZeroUsize::new),
            ..SweepConfig::default()
        };
        let mut ctx = SweepContext::new(root, target, config).expect("context");
        ctx.current_month = EffectiveMonth::new(2023, 3);
        ctx
    }

    fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("root");
        let target = tmp.path().join("target");
        fs::create_dir_all(&target).expect("mkdir target");
        touch(&root.join("A/jan-1.log"), 2023, 1);
        touch(&root.join("A/jan-2.log"), 2023, 1);
        touch(&root.join("A/mar.log"), 2023, 3);
        touch(&root.join("B/deep/jan.log"), 2023, 1);
        touch(&root.join("loose.log"), 2022, 1);
        (tmp, root, target)
    }

    #[test]
    fn archive_run_zips_each_unit_separately() {
        let (_tmp, root, target) = layout();
        let summary = run(&context(&root, &target, SinkMode::Archive, None)).expect("run");

        assert!(summary.is_clean(), "{summary:?}");
        assert_eq!(summary.subdirs, 2);
        assert_eq!(summary.batches_submitted, 2);
        assert_eq!(summary.files_processed, 3);
        assert_eq!(summary.files_held_back, 1);

        let zips = fs::read_dir(&target)
            .expect("read target")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("2023-1-archive_"))
            .count();
        assert_eq!(zips, 2);
        assert!(root.join("A/mar.log").exists());
        assert!(root.join("loose.log").exists());
        assert!(!root.join("B/deep/jan.log").exists());
    }

    #[test]
    fn relocate_run_is_idempotent() {
        let (_tmp, root, target) = layout();
        let ctx = context(&root, &target, SinkMode::Relocate, None);

        let first = run(&ctx).expect("first run");
        assert!(first.is_clean(), "{first:?}");
        assert_eq!(first.files_processed, 3);

        let second = run(&ctx).expect("second run");
        assert!(second.is_clean(), "{second:?}");
        assert_eq!(second.batches_submitted, 0);
        let folder = target.join("2023-01-archive");
        for moved in ["A/jan-1.log", "A/jan-2.log", "B/deep/jan.log"] {
            assert!(folder.join(moved).is_file(), "{moved} missing");
        }
    }

    #[test]
    fn plan_lists_batches_without_touching_files() {
        let (_tmp, root, target) = layout();
        let plan = plan(&context(&root, &target, SinkMode::Relocate, Some(1))).expect("plan");

        assert_eq!(plan.subdirs, 2);
        assert_eq!(plan.batches.len(), 3);
        assert!(plan.batches.iter().all(|b| b.destination == "2023-01-archive"));
        assert!(root.join("A/jan-1.log").exists());
        assert_eq!(fs::read_dir(&target).expect("read target").count(), 0);
    }

    #[test]
    fn collision_is_reported_and_sources_survive() {
        let (_tmp, root, target) = layout();
        let mut ctx = context(&root, &target, SinkMode::Archive, None);
        ctx.config.workers = NonZeroUsize::new(1).expect("non-zero");
        ctx.config.suffix = crate::sweep::sink::SuffixStrategy::Worker;
        fs::write(target.join("2023-1-archive_sweep-worker-0-0.zip"), b"x").expect("occupy");

        let summary = run(&ctx).expect("run");
        assert!(!summary.is_clean());
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].contains("already exists"), "{:?}", summary.failed);
        assert!(root.join("A/jan-1.log").exists());
        assert!(root.join("A/jan-2.log").exists());
    }

    #[test]
    fn target_inside_a_unit_is_rejected() {
        let (_tmp, root, _target) = layout();
        let nested = root.join("A/out");
        fs::create_dir_all(&nested).expect("mkdir nested");
        let err = SweepContext::new(&root, &nested, SweepConfig::default()).expect_err("reject");
        assert!(format!("{err:#}").contains("inside root"));
    }

    #[test]
    fn target_equal_to_root_skips_month_folders() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path();
        touch(&root.join("2023-01-archive/old.log"), 2023, 1);
        touch(&root.join("uploads/new.log"), 2023, 1);
        let units = list_units(root, root).expect("units");
        assert_eq!(units, vec![root.join("uploads")]);
    }
}
