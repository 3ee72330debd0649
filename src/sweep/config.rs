use crate::error::SweepError;
use crate::logging::LogFormat;
use crate::sweep::sink::{SinkMode, SuffixStrategy};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

include!(concat!(env!("OUT_DIR"), "/sweep_env_allowlist.rs"));

const DEFAULT_WORKERS: usize = 8;
const CONFIG_FILE: &str = "sweep.toml";

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub mode: SinkMode,
    pub workers: NonZeroUsize,
    /// `None` means one batch per month.
    pub max_batch_size: Option<NonZeroUsize>,
    pub batch_timeout_secs: Option<u64>,
    pub suffix: SuffixStrategy,
    pub progress: bool,
    pub log_format: LogFormat,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            mode: SinkMode::default(),
            workers: default_workers(),
            max_batch_size: None,
            batch_timeout_secs: None,
            suffix: SuffixStrategy::default(),
            progress: false,
            log_format: LogFormat::default(),
        }
    }
}

/// On-disk shape: every key optional, `0` disables the size cap and timeout.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialSweepConfig {
    mode: Option<SinkMode>,
    workers: Option<usize>,
    max_batch_size: Option<usize>,
    batch_timeout_secs: Option<u64>,
    suffix: Option<SuffixStrategy>,
    progress: Option<bool>,
    log_format: Option<LogFormat>,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<SinkMode>,
    pub workers: Option<NonZeroUsize>,
    pub max_batch_size: Option<NonZeroUsize>,
    pub batch_timeout_secs: Option<u64>,
    pub suffix: Option<SuffixStrategy>,
    pub progress: bool,
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SweepConfig,
    pub source: Option<PathBuf>,
    /// `SWEEP_*` variables set in the environment that nothing reads.
    pub unknown_env: Vec<String>,
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn lookup(env: EnvLookup<'_>, var: &str) -> Option<String> {
    env(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_number<T>(env: EnvLookup<'_>, var: &str, fallback: T) -> Result<T>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    match lookup(env, var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("{var}: expected a non-negative integer, got {raw:?} ({err})")),
        None => Ok(fallback),
    }
}

fn env_or_bool(env: EnvLookup<'_>, var: &str, fallback: bool) -> Result<bool> {
    match lookup(env, var).as_deref() {
        None => Ok(fallback),
        Some("1" | "true" | "TRUE" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow!("{var}: expected true or false, got {other:?}")),
    }
}

fn env_or_parsed<T: FromStr<Err = String>>(env: EnvLookup<'_>, var: &str, fallback: T) -> Result<T> {
    match lookup(env, var) {
        Some(raw) => raw.parse::<T>().map_err(|err| anyhow!("{var}: {err}")),
        None => Ok(fallback),
    }
}

fn resolve_config_path(env: EnvLookup<'_>) -> Option<PathBuf> {
    if let Some(custom) = lookup(env, "SWEEP_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    if let Some(home) = lookup(env, "SWEEP_HOME") {
        return Some(PathBuf::from(home).join(CONFIG_FILE));
    }
    Some(dirs::config_dir()?.join("month-sweep").join(CONFIG_FILE))
}

fn parse_file_config(raw: &str) -> Result<PartialSweepConfig> {
    Ok(toml::from_str(raw)?)
}

/// Flattened view used while layering; caps and timeouts are `0` for "off".
struct Layered {
    mode: SinkMode,
    workers: usize,
    max_batch_size: usize,
    batch_timeout_secs: u64,
    suffix: SuffixStrategy,
    progress: bool,
    log_format: LogFormat,
}

impl Layered {
    fn defaults() -> Self {
        let cfg = SweepConfig::default();
        Self {
            mode: cfg.mode,
            workers: cfg.workers.get(),
            max_batch_size: 0,
            batch_timeout_secs: 0,
            suffix: cfg.suffix,
            progress: cfg.progress,
            log_format: cfg.log_format,
        }
    }

    fn merge_file(&mut self, file: PartialSweepConfig) {
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        if let Some(cap) = file.max_batch_size {
            self.max_batch_size = cap;
        }
        if let Some(secs) = file.batch_timeout_secs {
            self.batch_timeout_secs = secs;
        }
        if let Some(suffix) = file.suffix {
            self.suffix = suffix;
        }
        if let Some(progress) = file.progress {
            self.progress = progress;
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
    }

    fn merge_env(&mut self, env: EnvLookup<'_>) -> Result<()> {
        self.mode = env_or_parsed(env, "SWEEP_MODE", self.mode)?;
        self.workers = env_or_number(env, "SWEEP_WORKERS", self.workers)?;
        self.max_batch_size = env_or_number(env, "SWEEP_MAX_BATCH_SIZE", self.max_batch_size)?;
        self.batch_timeout_secs =
            env_or_number(env, "SWEEP_BATCH_TIMEOUT_SECS", self.batch_timeout_secs)?;
        self.suffix = env_or_parsed(env, "SWEEP_SUFFIX", self.suffix)?;
        self.progress = env_or_bool(env, "SWEEP_PROGRESS", self.progress)?;
        self.log_format = env_or_parsed(env, "SWEEP_LOG_FORMAT", self.log_format)?;
        Ok(())
    }

    fn merge_overrides(&mut self, cli: &ConfigOverrides) {
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers.get();
        }
        if let Some(cap) = cli.max_batch_size {
            self.max_batch_size = cap.get();
        }
        if let Some(secs) = cli.batch_timeout_secs {
            self.batch_timeout_secs = secs;
        }
        if let Some(suffix) = cli.suffix {
            self.suffix = suffix;
        }
        self.progress |= cli.progress;
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
    }

    fn validate(self) -> Result<SweepConfig, SweepError> {
        let workers = NonZeroUsize::new(self.workers).ok_or_else(|| {
            SweepError::InvalidConfig("workers must be >= 1".to_string())
        })?;
        if self.workers > 1024 {
            return Err(SweepError::InvalidConfig(format!(
                "workers must be <= 1024, got {}",
                self.workers
            )));
        }
        Ok(SweepConfig {
            mode: self.mode,
            workers,
            max_batch_size: NonZeroUsize::new(self.max_batch_size),
            batch_timeout_secs: (self.batch_timeout_secs > 0).then_some(self.batch_timeout_secs),
            suffix: self.suffix,
            progress: self.progress,
            log_format: self.log_format,
        })
    }
}

fn unknown_env_keys(vars: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = vars
        .into_iter()
        .filter(|key| key.starts_with("SWEEP_"))
        .filter(|key| !GENERATED_SWEEP_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

fn load_with(env: EnvLookup<'_>, cli: &ConfigOverrides) -> Result<LoadedConfig> {
    let mut layered = Layered::defaults();

    let mut source = None;
    if let Some(path) = resolve_config_path(env)
        && path.is_file()
    {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read sweep config {}", path.display()))?;
        let file = parse_file_config(&raw)
            .with_context(|| format!("failed to parse sweep config {}", path.display()))?;
        layered.merge_file(file);
        source = Some(path);
    }

    layered.merge_env(env)?;
    layered.merge_overrides(cli);
    let config = layered.validate()?;

    Ok(LoadedConfig {
        config,
        source,
        unknown_env: Vec::new(),
    })
}

/// Defaults, then the TOML file, then `SWEEP_*` variables, then `cli`.
pub fn load_config(cli: &ConfigOverrides) -> Result<LoadedConfig> {
    let process_env = |var: &str| env::var(var).ok();
    let mut loaded = load_with(&process_env, cli)?;
    loaded.unknown_env = unknown_env_keys(env::vars().map(|(key, _)| key));
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn fake_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(env: &HashMap<String, String>, cli: &ConfigOverrides) -> Result<LoadedConfig> {
        let lookup = |var: &str| env.get(var).cloned();
        load_with(&lookup, cli)
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let tmp = tempdir().expect("tempdir");
        let env = fake_env(&[("SWEEP_HOME", tmp.path().to_str().expect("utf8"))]);
        let loaded = load(&env, &ConfigOverrides::default()).expect("load");
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.workers.get(), 8);
        assert_eq!(loaded.config.mode, SinkMode::Archive);
        assert!(loaded.config.max_batch_size.is_none());
        assert!(loaded.config.batch_timeout_secs.is_none());
    }

    #[test]
    fn file_then_env_then_cli() {
        let tmp = tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("sweep.toml"),
            "mode = \"relocate\"\nworkers = 3\nmax_batch_size = 50\nsuffix = \"worker\"\n",
        )
        .expect("write config");
        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_WORKERS", "5"),
            ("SWEEP_BATCH_TIMEOUT_SECS", "30"),
        ]);
        let cli = ConfigOverrides {
            max_batch_size: NonZeroUsize::new(10),
            ..ConfigOverrides::default()
        };

        let loaded = load(&env, &cli).expect("load");
        assert_eq!(loaded.source, Some(tmp.path().join("sweep.toml")));
        let cfg = loaded.config;
        assert_eq!(cfg.mode, SinkMode::Relocate);
        assert_eq!(cfg.suffix, SuffixStrategy::Worker);
        assert_eq!(cfg.workers.get(), 5);
        assert_eq!(cfg.max_batch_size.map(NonZeroUsize::get), Some(10));
        assert_eq!(cfg.batch_timeout_secs, Some(30));
    }

    #[test]
    fn zero_cap_in_env_means_unbounded() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("sweep.toml"), "max_batch_size = 20\n").expect("write config");
        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_MAX_BATCH_SIZE", "0"),
        ]);
        let loaded = load(&env, &ConfigOverrides::default()).expect("load");
        assert!(loaded.config.max_batch_size.is_none());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let tmp = tempdir().expect("tempdir");
        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_WORKERS", "0"),
        ]);
        let err = load(&env, &ConfigOverrides::default()).expect_err("invalid");
        assert!(format!("{err:#}").contains("workers must be >= 1"));
    }

    #[test]
    fn bad_mode_in_env_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_MODE", "copy"),
        ]);
        let err = load(&env, &ConfigOverrides::default()).expect_err("invalid");
        assert!(format!("{err:#}").contains("SWEEP_MODE"));
    }

    #[test]
    fn malformed_numbers_in_env_are_errors() {
        let tmp = tempdir().expect("tempdir");
        let home = tmp.path().to_str().expect("utf8");
        for (var, raw) in [
            ("SWEEP_WORKERS", "abc"),
            ("SWEEP_MAX_BATCH_SIZE", "-5"),
            ("SWEEP_BATCH_TIMEOUT_SECS", "1.5"),
        ] {
            let env = fake_env(&[("SWEEP_HOME", home), (var, raw)]);
            let err = load(&env, &ConfigOverrides::default()).expect_err(var);
            let message = format!("{err:#}");
            assert!(message.contains(var), "{message}");
            assert!(message.contains(raw), "{message}");
        }
    }

    #[test]
    fn malformed_bool_in_env_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_PROGRESS", "maybe"),
        ]);
        let err = load(&env, &ConfigOverrides::default()).expect_err("invalid");
        assert!(format!("{err:#}").contains("SWEEP_PROGRESS"));

        let env = fake_env(&[
            ("SWEEP_HOME", tmp.path().to_str().expect("utf8")),
            ("SWEEP_PROGRESS", "yes"),
        ]);
        assert!(load(&env, &ConfigOverrides::default()).expect("load").config.progress);
    }

    #[test]
    fn unknown_file_keys_fail_to_parse() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("custom.toml");
        fs::write(&path, "workerz = 2\n").expect("write config");
        let env = fake_env(&[("SWEEP_CONFIG_PATH", path.to_str().expect("utf8"))]);
        let err = load(&env, &ConfigOverrides::default()).expect_err("parse");
        assert!(format!("{err:#}").contains("failed to parse sweep config"));
    }

    #[test]
    fn unknown_env_keys_are_reported() {
        // Built from parts so the typo never lands in the generated allowlist.
        let typo = format!("{}WORKRS", "SWEEP_");
        let keys = unknown_env_keys(vec![
            "SWEEP_WORKERS".to_string(),
            typo.clone(),
            "PATH".to_string(),
        ]);
        assert_eq!(keys, vec![typo]);
    }

    #[test]
    fn generated_allowlist_holds_only_whole_key_literals() {
        assert!(GENERATED_SWEEP_ENV_ALLOWLIST.contains(&"SWEEP_WORKERS"));
        assert!(GENERATED_SWEEP_ENV_ALLOWLIST.contains(&"SWEEP_CONFIG_PATH"));
        assert!(
            GENERATED_SWEEP_ENV_ALLOWLIST
                .iter()
                .all(|key| key.len() > 6 && !key.ends_with("ALLOWLIST"))
        );
    }
}
