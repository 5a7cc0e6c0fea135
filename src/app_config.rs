//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use browser_downloads::EngineConfig;

use crate::cli::Args;

/// Directory name under the user config root.
const APP_DIR: &str = "browser-downloads";

/// `key = value` file configuration for CLI defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default download directory.
    pub download_dir: Option<PathBuf>,
    /// External store poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(poll_interval_ms) = self.poll_interval_ms
            && !(100..=60_000).contains(&poll_interval_ms)
        {
            bail!(
                "Invalid config value for `poll_interval_ms`: {poll_interval_ms}. Expected range: 100..=60000"
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// `tracing` level directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Effective settings after merging CLI flags over file values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub engine: EngineConfig,
    pub verbosity: VerbositySetting,
}

/// Merges CLI arguments over the file config; CLI values win.
#[must_use]
pub fn resolve_settings(args: &Args, file: Option<&FileConfig>) -> Settings {
    let file = file.cloned().unwrap_or_default();
    let mut engine = EngineConfig::default();

    if let Some(dir) = args.output_dir.clone().or(file.download_dir) {
        engine.download_dir = dir;
    }
    if let Some(ms) = args.poll_interval_ms.or(file.poll_interval_ms) {
        engine.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = file.connect_timeout_secs {
        engine.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.read_timeout_secs {
        engine.read_timeout = Duration::from_secs(secs);
    }

    let verbosity = if args.quiet {
        VerbositySetting::Quiet
    } else {
        match args.verbose {
            0 => file.verbosity.unwrap_or(VerbositySetting::Default),
            1 => VerbositySetting::Verbose,
            _ => VerbositySetting::Debug,
        }
    };

    Settings { engine, verbosity }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/browser-downloads/config.toml`
/// 2. `$HOME/.config/browser-downloads/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path; a missing file yields `None`.
pub fn load_default_file_config() -> Result<Option<FileConfig>> {
    let Some(path) = resolve_default_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_file_config(&path).map(Some)
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "download_dir" => {
                let parsed = parse_string_literal(value).with_context(|| {
                    format!("Invalid `download_dir` value on line {line_number}")
                })?;
                cfg.download_dir = Some(PathBuf::from(parsed));
            }
            "poll_interval_ms" | "connect_timeout_secs" | "read_timeout_secs" => {
                let parsed = parse_integer_u64(value)
                    .with_context(|| format!("Invalid `{key}` value on line {line_number}"))?;
                match key {
                    "poll_interval_ms" => cfg.poll_interval_ms = Some(parsed),
                    "connect_timeout_secs" => cfg.connect_timeout_secs = Some(parsed),
                    _ => cfg.read_timeout_secs = Some(parsed),
                }
            }
            "verbosity" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `verbosity` value on line {line_number}"))?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
