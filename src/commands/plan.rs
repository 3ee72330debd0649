use anyhow::Result;

use crate::commands::CommandReport;
use crate::sweep::lock::lock_holder;
use crate::sweep::runner::{self, SweepContext, SweepPlan};

fn describe(report: &mut CommandReport, plan: &SweepPlan) {
    report.detail(format!("subdirs={}", plan.subdirs));
    report.detail(format!("files_discovered={}", plan.files_discovered));
    report.detail(format!("entries_skipped={}", plan.entries_skipped));
    report.detail(format!("files_held_back={}", plan.files_held_back));
    report.detail(format!("batches_planned={}", plan.batches.len()));
    for batch in &plan.batches {
        report.detail(format!(
            "{} -> {} ({} files)",
            batch.batch, batch.destination, batch.files
        ));
    }
}

/// Dry run: same discovery and grouping as a sweep, no file is touched.
pub fn run(ctx: &SweepContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("plan");
    report.detail(format!("root={}", ctx.root.display()));
    report.detail(format!("target={}", ctx.target.display()));
    report.detail(format!("mode={}", ctx.config.mode));
    report.detail(format!("current_month={}", ctx.current_month));
    if let Some(holder) = lock_holder(&ctx.target) {
        report.detail(format!("target is locked by a running sweep: {holder}"));
    }

    let plan = runner::plan(ctx)?;
    describe(&mut report, &plan);
    Ok(report)
}
