//! Tuner configuration: presets plus environment overrides.
//!
//! | Variable                | Effect                                   |
//! |-------------------------|------------------------------------------|
//! | `TILE_TUNER_CONFIG_DIR` | root of the file tile config database    |
//! | `TILE_TUNER_POLICY`     | `default` or `database`                  |
//! | `TILE_TUNER_LEVEL`      | `fast`, `default` or `thorough`          |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::autotuning::config_manager::SchedulePolicy;
use crate::autotuning::objective::ObjectiveConfig;
use crate::autotuning::search::SearchConfig;
use crate::autotuning::TuneLevel;
use crate::types::TuneResult;

pub const ENV_CONFIG_DIR: &str = "TILE_TUNER_CONFIG_DIR";
pub const ENV_POLICY: &str = "TILE_TUNER_POLICY";
pub const ENV_LEVEL: &str = "TILE_TUNER_LEVEL";

/// Default database location: `~/.cache/tile-tuner`.
pub fn default_config_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("tile-tuner"),
        None => PathBuf::from("tile_tuner_db"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    pub config_dir: PathBuf,
    pub policy: SchedulePolicy,
    pub level: TuneLevel,
    pub objective: ObjectiveConfig,
    /// Evaluate candidates on the rayon pool.
    pub parallel: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            config_dir: default_config_dir(),
            policy: SchedulePolicy::Database,
            level: TuneLevel::Default,
            objective: ObjectiveConfig::default(),
            parallel: true,
        }
    }
}

impl TunerConfig {
    /// Defaults with the process environment applied.
    pub fn from_env() -> TuneResult<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (an environment accessor).
    pub fn with_overrides<F>(mut self, lookup: F) -> TuneResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CONFIG_DIR).filter(|d| !d.is_empty()) {
            self.config_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup(ENV_POLICY) {
            self.policy = policy.parse()?;
        }
        if let Some(level) = lookup(ENV_LEVEL) {
            self.level = level.parse()?;
        }
        Ok(self)
    }

    /// Search settings for the configured level.
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            parallel: self.parallel,
            ..self.level.search_config()
        }
    }
}
