//! Layered daemon configuration: built-in defaults, overridden by an
//! optional TOML file, overridden by `ANTARA_*` environment variables.
//!
//! Grounded on the workspace path resolution and `Config::load`/`save`
//! pattern used elsewhere in this code's ancestry for per-provider TOML
//! config; generalized here to the single `DaemonConfig` tree this core
//! needs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a home directory for antara; set ANTARA_HOME")]
    NoHomeDirectory,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

/// Resolve the data/home directory for the daemon: explicit override, then
/// `ANTARA_HOME`, then the platform project data dir, then `~/.antara`.
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_path) = std::env::var("ANTARA_HOME") {
        return Ok(expand_tilde(&env_path));
    }
    if let Some(proj) = directories::ProjectDirs::from("com", "antara", "core") {
        return Ok(proj.data_dir().to_path_buf());
    }
    if let Some(base) = directories::BaseDirs::new() {
        return Ok(base.home_dir().join(".antara"));
    }
    Err(ConfigError::NoHomeDirectory)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NidraSettings {
    pub idle_threshold_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub backfill_on_startup: bool,
    pub max_backfill_days: u32,
    pub retention_months: u32,
}

impl Default for NidraSettings {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 300,
            heartbeat_interval_secs: 5,
            backfill_on_startup: true,
            max_backfill_days: 30,
            retention_months: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallSettings {
    pub bm25_k1: f64,
    pub bm25_b: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub graph_weight: f64,
    pub default_top_k: usize,
    pub embedding_dimensions: usize,
    pub gate_min_query_len: usize,
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            bm25_k1: 1.2,
            bm25_b: 0.75,
            lexical_weight: 1.0,
            vector_weight: 1.0,
            graph_weight: 0.5,
            default_top_k: 10,
            embedding_dimensions: 256,
            gate_min_query_len: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// If true, a rule evaluation error fails open (`allow`) instead of
    /// denying. Defaults to false: unhandled policy errors deny.
    pub permissive_on_error: bool,
    pub approval_timeout_secs: u64,
    pub max_pending_approvals: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            permissive_on_error: false,
            approval_timeout_secs: 300,
            max_pending_approvals: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub max_events_per_job: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_queue_size: 256,
            max_events_per_job: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySettings {
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub max_health_failures: u32,
    pub circuit_failure_threshold: usize,
    pub circuit_window_secs: u64,
    pub circuit_cooldown_secs: u64,
    pub quarantine_max_crashes: usize,
    pub quarantine_crash_window_secs: u64,
    pub quarantine_duration_secs: u64,
    pub max_restarts: u32,
    pub discovery_interval_secs: u64,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            max_health_failures: 3,
            circuit_failure_threshold: 5,
            circuit_window_secs: 60,
            circuit_cooldown_secs: 30,
            quarantine_max_crashes: 3,
            quarantine_crash_window_secs: 300,
            quarantine_duration_secs: 600,
            max_restarts: 5,
            discovery_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SabhaSettings {
    pub max_participants: usize,
    pub max_rounds: usize,
    pub consensus_threshold: f64,
    pub auto_escalate: bool,
}

impl Default for SabhaSettings {
    fn default() -> Self {
        Self {
            max_participants: 7,
            max_rounds: 3,
            consensus_threshold: 0.67,
            auto_escalate: false,
        }
    }
}

impl SabhaSettings {
    /// The spec clamps the consensus threshold to [0.5, 0.95] regardless of
    /// what an operator puts in the config file.
    pub fn clamped_consensus_threshold(&self) -> f64 {
        self.consensus_threshold.clamp(0.5, 0.95)
    }

    pub fn clamped_max_participants(&self) -> usize {
        self.max_participants.min(20)
    }

    pub fn clamped_max_rounds(&self) -> usize {
        self.max_rounds.min(10)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub home: Option<PathBuf>,
    pub log_level: String,
    pub nidra: NidraSettings,
    pub recall: RecallSettings,
    pub policy: PolicySettings,
    pub jobs: JobSettings,
    pub capability: CapabilitySettings,
    pub sabha: SabhaSettings,
    pub chetana: crate::chetana::ChetanaConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            home: None,
            log_level: "info".to_string(),
            nidra: NidraSettings::default(),
            recall: RecallSettings::default(),
            policy: PolicySettings::default(),
            jobs: JobSettings::default(),
            capability: CapabilitySettings::default(),
            sabha: SabhaSettings::default(),
            chetana: crate::chetana::ChetanaConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// `explicit_path` takes priority; otherwise `<home>/config.toml` is
    /// tried; a missing file is not an error, it yields defaults. Every
    /// field is `#[serde(default)]` so a partial file only overrides what
    /// it names.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let home = resolve_home(None)?;
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join("config.toml"));

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(home) = std::env::var("ANTARA_HOME") {
            self.home = Some(expand_tilde(&home));
        }
        if let Ok(level) = std::env::var("ANTARA_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, toml_str).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn effective_home(&self) -> Result<PathBuf> {
        resolve_home(self.home.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.nidra.idle_threshold_secs, 300);
    }

    #[test]
    fn partial_file_falls_back_to_defaults_for_unset_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.jobs.max_concurrent, 4);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = DaemonConfig::default();
        config.jobs.max_concurrent = 8;
        config.save_to(&path).unwrap();
        let reloaded = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(reloaded.jobs.max_concurrent, 8);
    }

    #[test]
    fn sabha_threshold_is_clamped() {
        let mut s = SabhaSettings::default();
        s.consensus_threshold = 0.99;
        assert_eq!(s.clamped_consensus_threshold(), 0.95);
        s.consensus_threshold = 0.1;
        assert_eq!(s.clamped_consensus_threshold(), 0.5);
    }
}
