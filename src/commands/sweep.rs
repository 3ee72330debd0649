use anyhow::Result;
use tracing::{info, warn};

use crate::commands::CommandReport;
use crate::sweep::dispatch::{AbortFlag, AbortReason};
use crate::sweep::lock::SweepLock;
use crate::sweep::runner::{self, SweepContext, SweepSummary};

fn install_interrupt_handler(abort: &AbortFlag) {
    let abort = abort.clone();
    let installed = ctrlc::set_handler(move || {
        warn!("interrupt received; running batches finish, queued batches are cancelled");
        abort.trip(AbortReason::Interrupted);
    });
    if let Err(err) = installed {
        warn!("failed to install interrupt handler: {err}");
    }
}

fn summarize(report: &mut CommandReport, summary: &SweepSummary) {
    report.detail(format!("subdirs={}", summary.subdirs));
    report.detail(format!("files_discovered={}", summary.files_discovered));
    report.detail(format!("entries_skipped={}", summary.entries_skipped));
    report.detail(format!("files_held_back={}", summary.files_held_back));
    report.detail(format!("batches_submitted={}", summary.batches_submitted));
    report.detail(format!("batches_succeeded={}", summary.succeeded.len()));
    report.detail(format!("files_processed={}", summary.files_processed));
    for outcome in &summary.succeeded {
        report.detail(format!(
            "{} -> {} ({} files)",
            outcome.batch,
            outcome.destination.display(),
            outcome.files
        ));
    }

    if summary.interrupted {
        report.issue("run interrupted; batches not yet started were cancelled");
    }
    for failed in &summary.failed {
        report.issue(failed.clone());
    }
    if !summary.cancelled.is_empty() {
        report.issue(format!(
            "{} batch(es) cancelled before start",
            summary.cancelled.len()
        ));
    }
}

pub fn run(ctx: &SweepContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("sweep");
    let lock = SweepLock::acquire(&ctx.target)?;
    info!(lock = %lock.path().display(), "holding sweep lock");
    install_interrupt_handler(&ctx.abort);

    report.detail(format!("root={}", ctx.root.display()));
    report.detail(format!("target={}", ctx.target.display()));
    report.detail(format!("mode={}", ctx.config.mode));
    report.detail(format!("current_month={}", ctx.current_month));

    let summary = runner::run(ctx)?;
    summarize(&mut report, &summary);
    drop(lock);
    Ok(report)
}
