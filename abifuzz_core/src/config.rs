//! TOML configuration for a fuzzing run. Every field has a default so an
//! empty file (or no file) yields a working setup; unknown keys are rejected
//! to catch typos early.

use crate::executor::CommandBackendConfig;
use crate::fuzzer::{CampaignConfig, Granularity, DEFAULT_BREAKOUT_COEF};
use crate::report::ReportCadence;
use crate::schedule::Driver;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AbifuzzConfig {
    #[serde(default)]
    pub campaign: CampaignSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CampaignSection {
    #[serde(default = "default_runs")]
    pub runs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_driver")]
    pub driver: DriverSetting,
    #[serde(default = "default_granularity")]
    pub granularity: GranularitySetting,
    #[serde(default = "default_schedule_coef")]
    pub schedule_coef: f64,
    #[serde(default = "default_breakout_coef")]
    pub breakout_coef: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverSetting {
    Coverage,
    State,
    Combined,
}

impl From<DriverSetting> for Driver {
    fn from(setting: DriverSetting) -> Self {
        match setting {
            DriverSetting::Coverage => Driver::Coverage,
            DriverSetting::State => Driver::State,
            DriverSetting::Combined => Driver::Combined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GranularitySetting {
    Partial,
    Total,
}

impl From<GranularitySetting> for Granularity {
    fn from(setting: GranularitySetting) -> Self {
        match setting {
            GranularitySetting::Partial => Granularity::Partial,
            GranularitySetting::Total => Granularity::Total,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackendSection {
    /// Adapter command line; must be non-empty before a backend can be built.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReportSection {
    /// Metrics CSV destination; reporting is disabled when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub every_calls: Option<u64>,
    #[serde(default)]
    pub every_secs: Option<u64>,
}

fn default_runs() -> u64 {
    1000
}

fn default_driver() -> DriverSetting {
    DriverSetting::Combined
}

fn default_granularity() -> GranularitySetting {
    GranularitySetting::Total
}

fn default_schedule_coef() -> f64 {
    0.5
}

fn default_breakout_coef() -> f64 {
    DEFAULT_BREAKOUT_COEF
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

const DEFAULT_REPORT_EVERY_CALLS: u64 = 100;

impl Default for CampaignSection {
    fn default() -> Self {
        Self {
            runs: default_runs(),
            timeout_secs: None,
            driver: default_driver(),
            granularity: default_granularity(),
            schedule_coef: default_schedule_coef(),
            breakout_coef: default_breakout_coef(),
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_ms: default_backend_timeout_ms(),
            working_dir: None,
        }
    }
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            path: None,
            every_calls: None,
            every_secs: None,
        }
    }
}

impl AbifuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl CampaignSection {
    pub fn to_campaign_config(&self) -> Result<CampaignConfig, ConfigError> {
        if !(0.0..=1.0).contains(&self.breakout_coef) {
            return Err(ConfigError::Invalid(format!(
                "breakout-coef must be in [0, 1], got {}",
                self.breakout_coef
            )));
        }
        if !(0.0..=1.0).contains(&self.schedule_coef) {
            return Err(ConfigError::Invalid(format!(
                "schedule-coef must be in [0, 1], got {}",
                self.schedule_coef
            )));
        }
        if self.runs == 0 && self.timeout_secs.is_none() {
            return Err(ConfigError::Invalid(
                "either runs or timeout-secs must set a stopping budget".to_string(),
            ));
        }
        Ok(CampaignConfig {
            runs: if self.runs == 0 { u64::MAX } else { self.runs },
            timeout: self.timeout_secs.map(Duration::from_secs),
            driver: self.driver.into(),
            granularity: self.granularity.into(),
            schedule_coef: self.schedule_coef,
            breakout_coef: self.breakout_coef,
        })
    }
}

impl BackendSection {
    pub fn to_backend_config(&self) -> Result<CommandBackendConfig, ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::Invalid(
                "backend.command must name an adapter program".to_string(),
            ));
        }
        Ok(CommandBackendConfig {
            command: self.command.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            working_dir: self.working_dir.clone(),
        })
    }
}

impl ReportSection {
    /// Resolved reporting destination and cadence, if reporting is enabled.
    pub fn cadence(&self) -> Result<Option<(PathBuf, ReportCadence)>, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let cadence = match (self.every_calls, self.every_secs) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "set only one of report.every-calls and report.every-secs".to_string(),
                ));
            }
            (Some(calls), None) => ReportCadence::EveryCalls(calls),
            (None, Some(secs)) => ReportCadence::EverySecs(secs),
            (None, None) => ReportCadence::EveryCalls(DEFAULT_REPORT_EVERY_CALLS),
        };
        Ok(Some((path.clone(), cadence)))
    }
}
