use anyhow::{Result, bail};
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::commands::{self, CommandReport};
use crate::logging::{self, LogFormat};
use crate::sweep::config::{ConfigOverrides, load_config};
use crate::sweep::runner::SweepContext;
use crate::sweep::sink::{SinkMode, SuffixStrategy};

/// Archive or relocate files into per-month batches.
#[derive(Parser, Debug)]
#[command(
    name = "month-sweep",
    version,
    about = "Archive or relocate files into per-month batches",
    long_about = "Walks every subdirectory of ROOT, groups files by the month of their \
                  modification time and hands each month (split at MAX_BATCH_SIZE) to a \
                  worker that either zips it into TARGET and deletes the sources, or moves \
                  it into TARGET/<YYYY>-<MM>-archive. Files from the current month are \
                  never touched.",
    after_help = "EXAMPLES:\n    \
        month-sweep /var/log/apps /srv/archive\n    \
        month-sweep /var/log/apps /srv/archive 500 --workers 4\n    \
        month-sweep /data/uploads /data/by-month --mode relocate --dry-run"
)]
pub struct Cli {
    /// Directory whose immediate subdirectories are swept
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Existing directory that receives containers or month folders
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// Maximum files per batch (unbounded if not set)
    #[arg(value_name = "MAX_BATCH_SIZE")]
    pub max_batch_size: Option<NonZeroUsize>,

    /// What to do with each batch
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<SinkMode>,

    /// Number of worker threads
    #[arg(short = 'w', long, value_name = "NUM")]
    pub workers: Option<NonZeroUsize>,

    /// Give up on a batch that runs longer than this (0 = never)
    #[arg(long, value_name = "SECS")]
    pub batch_timeout_secs: Option<u64>,

    /// Container name suffix: random uuid, or worker name plus batch number
    #[arg(long, value_name = "SUFFIX")]
    pub suffix: Option<SuffixStrategy>,

    /// List the batches that would be processed without touching any file
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Show a progress bar per running batch
    #[arg(short, long)]
    pub progress: bool,

    /// Log line format on stderr
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mode: self.mode,
            workers: self.workers,
            max_batch_size: self.max_batch_size,
            batch_timeout_secs: self.batch_timeout_secs,
            suffix: self.suffix,
            progress: self.progress,
            log_format: self.log_format,
        }
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&cli.overrides())?;
    logging::init(loaded.config.log_format)?;

    if let Some(source) = &loaded.source {
        debug!(path = %source.display(), "loaded config file");
    }
    for key in &loaded.unknown_env {
        warn!(key = %key, "ignoring unknown environment variable");
    }

    let ctx = SweepContext::new(&cli.root, &cli.target, loaded.config)?;
    let report = if cli.dry_run {
        commands::plan::run(&ctx)?
    } else {
        commands::sweep::run(&ctx)?
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
