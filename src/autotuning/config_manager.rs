//! Serves tile configurations to the schedule generator.
//!
//! Under the `database` policy a bucket resolves to an exact record, then the
//! smallest enclosing record, then the heuristic. Under `default` the
//! heuristic is always used. Every answer says which of these produced it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::autotuning::bucket::{AxisTag, BucketInfo, IterSpaceType};
use crate::autotuning::database::{Lookup, TileConfigDatabase, TileConfigMap};
use crate::autotuning::heuristic::{heuristic_from_extents, heuristic_tile_config};
use crate::autotuning::search_space::TileConfig;
use crate::config::TunerConfig;
use crate::target::{default_target, Target};
use crate::types::{TuneError, TuneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Heuristic only
    Default,
    /// Tuned records first, heuristic as fallback
    Database,
}

impl SchedulePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePolicy::Default => "default",
            SchedulePolicy::Database => "database",
        }
    }
}

impl FromStr for SchedulePolicy {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(SchedulePolicy::Default),
            "database" => Ok(SchedulePolicy::Database),
            other => Err(TuneError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    Exact,
    Enclosing,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedConfig {
    pub config: TileConfig,
    pub source: ConfigSource,
    /// Tuned score, when the config came from a record
    pub score: Option<f64>,
}

/// Policy-driven tile config lookup for one target.
#[derive(Debug)]
pub struct ScheduleConfigManager {
    target: Target,
    policy: SchedulePolicy,
    configs: HashMap<IterSpaceType, TileConfigMap>,
}

impl ScheduleConfigManager {
    /// Manager with the `default` policy and no records.
    pub fn new(target: Target) -> Self {
        ScheduleConfigManager {
            target,
            policy: SchedulePolicy::Default,
            configs: HashMap::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// Switch policy by name. Unknown names leave the policy unchanged.
    pub fn set_policy(&mut self, name: &str) -> TuneResult<()> {
        self.policy = name.parse()?;
        log::info!("schedule config policy set to {}", self.policy);
        Ok(())
    }

    /// Merge records for an iteration space; later records win.
    pub fn add_configs(&mut self, iter_space: IterSpaceType, configs: TileConfigMap) {
        self.configs.entry(iter_space).or_default().extend(configs);
    }

    /// Load the target's records for `iter_space`. Returns how many were found.
    pub fn load_from(
        &mut self,
        database: &dyn TileConfigDatabase,
        iter_space: &IterSpaceType,
    ) -> usize {
        let map = database.get_configs(&self.target, iter_space);
        let n = map.len();
        log::debug!("loaded {n} tile configs for {iter_space}");
        self.add_configs(iter_space.clone(), map);
        n
    }

    pub fn get_config(&self, bucket: &BucketInfo) -> ResolvedConfig {
        if self.policy == SchedulePolicy::Database {
            let lookup = self
                .configs
                .get(&bucket.iter_space_type())
                .map_or(Lookup::Miss, |m| m.lookup(&bucket.key()));
            match lookup {
                Lookup::Exact(r) => {
                    return ResolvedConfig {
                        config: r.config,
                        source: ConfigSource::Exact,
                        score: Some(r.score),
                    }
                }
                Lookup::Enclosing(r) => {
                    log::debug!("{} served by enclosing bucket {}", bucket.key(), r.bucket);
                    return ResolvedConfig {
                        config: r.config,
                        source: ConfigSource::Enclosing,
                        score: Some(r.score),
                    };
                }
                Lookup::Miss => {
                    log::debug!("no tuned config for {}, using heuristic", bucket.key())
                }
            }
        }
        ResolvedConfig {
            config: heuristic_tile_config(&self.target, bucket),
            source: ConfigSource::Heuristic,
            score: None,
        }
    }

    /// Resolve a concrete shape of the given iteration space.
    pub fn get_config_for_shape(
        &self,
        iter_space: &IterSpaceType,
        shape: &[i64],
    ) -> ResolvedConfig {
        if self.policy == SchedulePolicy::Database {
            if let Some(r) = self
                .configs
                .get(iter_space)
                .and_then(|m| m.lookup_shape(shape))
            {
                let source = if r.bucket.volume() == 1 {
                    ConfigSource::Exact
                } else {
                    ConfigSource::Enclosing
                };
                return ResolvedConfig {
                    config: r.config,
                    source,
                    score: Some(r.score),
                };
            }
        }
        let extent = |tag: AxisTag| -> i64 {
            iter_space
                .0
                .iter()
                .zip(shape)
                .filter(|((t, _), _)| *t == tag)
                .map(|(_, &d)| d)
                .product()
        };
        ResolvedConfig {
            config: heuristic_from_extents(
                &self.target,
                extent(AxisTag::Spatial),
                extent(AxisTag::Reduce),
            ),
            source: ConfigSource::Heuristic,
            score: None,
        }
    }
}

static GLOBAL: OnceLock<RwLock<ScheduleConfigManager>> = OnceLock::new();

/// Process-wide manager for configure-once, read-many callers.
///
/// Initialised on first use for the default target, with the policy from
/// `TILE_TUNER_POLICY` when it is set and valid.
pub fn global() -> &'static RwLock<ScheduleConfigManager> {
    GLOBAL.get_or_init(|| {
        let mut manager = ScheduleConfigManager::new(default_target());
        match TunerConfig::from_env() {
            Ok(cfg) => manager.policy = cfg.policy,
            Err(e) => log::warn!("ignoring tuner environment: {e}"),
        }
        RwLock::new(manager)
    })
}
