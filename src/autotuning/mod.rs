//! Search-based tile configuration tuning.
//!
//! Finds the reduce tile configuration (warps per block, tree-reduce width,
//! rows per thread group) that minimises measured cost over a shape bucket,
//! and stores it in a config database the schedule generator reads back.
//!
//! # Architecture
//!
//! ```text
//! bucket          -- shape buckets, the width step function, bucket sweeps
//! search_space    -- tile parameters constrained by hardware limits
//! measure         -- measurer trait, simulated GPU model, bench harness
//! kernel          -- host reduce kernel measurer
//! objective       -- weighted sampling over a bucket's shapes
//! search          -- grid / random / guided search
//! database        -- per-bucket records, in memory or JSON files
//! heuristic       -- fallback config without tuning
//! config_manager  -- policy-driven config lookup
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_tuner::autotuning::{BucketSweep, SimulatedMeasurer, TileTuner};
//! use tile_tuner::{Target, TensorProgram, TunerConfig};
//!
//! let mut tuner = TileTuner::with_file_database(
//!     Target::nvidia_a100(),
//!     Arc::new(SimulatedMeasurer::new()),
//!     TunerConfig::from_env()?,
//! );
//! let sweep = BucketSweep::spatial_reduce((32, 32), false, (32, 1024), true)?;
//! for entry in tuner.tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)? {
//!     println!("{}: {} (score {:.3})", entry.bucket, entry.config, entry.score);
//! }
//! # Ok::<(), tile_tuner::TuneError>(())
//! ```

pub mod bucket;
pub mod config_manager;
pub mod database;
pub mod heuristic;
pub mod kernel;
pub mod measure;
pub mod objective;
pub mod search;
pub mod search_space;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use bucket::{
    get_tile_size_config, AxisSweep, AxisTag, BucketInfo, BucketKey, BucketSweep, Dimension,
    IterSpaceType,
};
pub use config_manager::{
    global, ConfigSource, ResolvedConfig, ScheduleConfigManager, SchedulePolicy,
};
pub use database::{
    FileTileConfigDatabase, Lookup, NaiveTileConfigDatabase, TileConfigDatabase, TileConfigMap,
    TileConfigRecord,
};
pub use heuristic::heuristic_tile_config;
pub use kernel::HostMeasurer;
pub use measure::{BenchConfig, BenchResult, Measurer, SimulatedMeasurer};
pub use objective::{
    Evaluation, FailurePolicy, GridSamplingObjectiveFunc, ObjectiveConfig, ObjectiveFunc,
    WeightedSamplingTrailObjectiveFunc,
};
pub use search::{ScheduleConfigSearcher, SearchConfig, SearchResult, SearchStrategy};
pub use search_space::{CandidateSpace, Constraint, ParamRange, TileConfig};

use crate::config::TunerConfig;
use crate::program::TensorProgram;
use crate::target::Target;
use crate::types::{TuneError, TuneResult};

/// How thorough the tuning should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuneLevel {
    /// Coarse grid and a short refinement under a fixed budget.
    Fast,
    /// Coarse grid plus two refinement rounds.
    Default,
    /// Every legal candidate.
    Thorough,
}

impl TuneLevel {
    pub fn search_config(&self) -> SearchConfig {
        match self {
            TuneLevel::Fast => SearchConfig::fast(),
            TuneLevel::Default => SearchConfig::default(),
            TuneLevel::Thorough => SearchConfig::thorough(),
        }
    }
}

impl FromStr for TuneLevel {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(TuneLevel::Fast),
            "default" => Ok(TuneLevel::Default),
            "thorough" => Ok(TuneLevel::Thorough),
            other => Err(TuneError::InvalidConfig(format!("unknown tune level '{other}'"))),
        }
    }
}

impl fmt::Display for TuneLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TuneLevel::Fast => "fast",
            TuneLevel::Default => "default",
            TuneLevel::Thorough => "thorough",
        })
    }
}

/// Outcome of tuning one bucket.
#[derive(Debug, Clone)]
pub struct TuneReport {
    pub bucket: BucketKey,
    pub config: TileConfig,
    pub score: f64,
    /// The record already existed and no search ran
    pub from_database: bool,
    pub evaluations: usize,
    /// Human-readable report
    pub report: String,
}

/// Drives search and persistence for one target.
pub struct TileTuner {
    target: Target,
    database: Box<dyn TileConfigDatabase>,
    measurer: Arc<dyn Measurer>,
    config: TunerConfig,
    retune: bool,
}

impl TileTuner {
    pub fn new(
        target: Target,
        database: Box<dyn TileConfigDatabase>,
        measurer: Arc<dyn Measurer>,
        config: TunerConfig,
    ) -> Self {
        TileTuner {
            target,
            database,
            measurer,
            config,
            retune: false,
        }
    }

    /// Tuner persisting to JSON files under `config.config_dir`.
    pub fn with_file_database(
        target: Target,
        measurer: Arc<dyn Measurer>,
        config: TunerConfig,
    ) -> Self {
        let db = FileTileConfigDatabase::new(config.config_dir.clone());
        Self::new(target, Box::new(db), measurer, config)
    }

    /// Search even when the database already holds the bucket.
    pub fn retune(mut self, retune: bool) -> Self {
        self.retune = retune;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn database(&self) -> &dyn TileConfigDatabase {
        self.database.as_ref()
    }

    /// Search settings for the configured level. Evaluation is sequential
    /// when the measurer cannot time candidates concurrently.
    pub fn search_config(&self) -> SearchConfig {
        let mut config = self.config.search_config();
        if config.parallel && !self.measurer.parallel_safe() {
            log::debug!(
                "{} measurer times serially, disabling parallel search",
                self.measurer.name()
            );
            config.parallel = false;
        }
        config
    }

    /// Tune one bucket and record the winner. Call [`commit`](Self::commit)
    /// to persist.
    pub fn tune_bucket(
        &mut self,
        program: &TensorProgram,
        bucket: &BucketInfo,
    ) -> TuneResult<TuneReport> {
        let key = bucket.key();

        if !self.retune {
            let existing = self
                .database
                .get_configs(&self.target, &bucket.iter_space_type());
            if let Some(rec) = existing.get(&key) {
                log::info!("{key}: using stored {} (score {:.4})", rec.config, rec.score);
                return Ok(TuneReport {
                    bucket: key,
                    config: rec.config,
                    score: rec.score,
                    from_database: true,
                    evaluations: 0,
                    report: format!("Loaded from database: {}", rec.config),
                });
            }
        }

        let space = CandidateSpace::for_reduce(&self.target, bucket)?;
        let objective = WeightedSamplingTrailObjectiveFunc::new(
            program.clone(),
            bucket,
            self.target.clone(),
            Arc::clone(&self.measurer),
            &self.config.objective,
        )?;
        let searcher =
            ScheduleConfigSearcher::new(Box::new(objective), space, self.search_config());
        let result = searcher.search()?;

        self.database
            .add_config(&self.target, bucket, result.best_config, result.best_score);
        let report = search::format_report(&result, &program.name, &key.to_string());

        Ok(TuneReport {
            bucket: key,
            config: result.best_config,
            score: result.best_score,
            from_database: false,
            evaluations: result.evaluations,
            report,
        })
    }

    /// Tune every bucket of `sweep`, then commit. `build_program` supplies
    /// the program for each bucket, since static extents change between
    /// buckets.
    ///
    /// Buckets without a viable candidate are logged and skipped; any other
    /// error aborts the sweep.
    pub fn tune_sweep<F>(
        &mut self,
        sweep: &BucketSweep,
        mut build_program: F,
    ) -> TuneResult<Vec<TuneReport>>
    where
        F: FnMut(&BucketInfo) -> TensorProgram,
    {
        let buckets = sweep.buckets()?;
        log::info!("sweeping {} buckets on {}", buckets.len(), self.target.arch);

        let mut reports = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            let bounds: Vec<String> = bucket
                .space
                .iter()
                .map(|d| format!("{}[{}, {}]", d.tag, d.lower, d.upper))
                .collect();
            log::info!("tuning bucket {}", bounds.join(" x "));

            let program = build_program(bucket);
            match self.tune_bucket(&program, bucket) {
                Ok(report) => {
                    log::info!("  best {} score {:.4}", report.config, report.score);
                    reports.push(report);
                }
                Err(TuneError::NoViableConfig { evaluated }) => {
                    log::warn!("  no viable config after {evaluated} evaluations, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        self.commit()?;
        Ok(reports)
    }

    pub fn commit(&mut self) -> TuneResult<()> {
        self.database.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::build_reduce_sum;

    fn tuner() -> TileTuner {
        let config = TunerConfig {
            level: TuneLevel::Fast,
            ..TunerConfig::default()
        };
        TileTuner::new(
            Target::nvidia_a100(),
            Box::new(NaiveTileConfigDatabase::new()),
            Arc::new(SimulatedMeasurer::new()),
            config,
        )
    }

    fn bucket() -> BucketInfo {
        BucketInfo::new(vec![
            Dimension::uniform(32, 32, AxisTag::Spatial, false).unwrap(),
            Dimension::uniform(256, 383, AxisTag::Reduce, true).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_tune_level_parse() {
        assert_eq!("Fast".parse::<TuneLevel>().unwrap(), TuneLevel::Fast);
        assert!("slow".parse::<TuneLevel>().is_err());
        assert_eq!(TuneLevel::Thorough.to_string(), "thorough");
    }

    #[test]
    fn test_tune_bucket_then_database_hit() {
        let mut t = tuner();
        let program = build_reduce_sum(32, -1);
        let first = t.tune_bucket(&program, &bucket()).unwrap();
        assert!(!first.from_database);
        assert!(first.evaluations > 0);
        assert!(first.report.contains("Tile Tuning Report"));

        let second = t.tune_bucket(&program, &bucket()).unwrap();
        assert!(second.from_database);
        assert_eq!(second.config, first.config);
        assert_eq!(second.evaluations, 0);

        let mut t = t.retune(true);
        assert!(!t.tune_bucket(&program, &bucket()).unwrap().from_database);
    }

    #[test]
    fn test_wall_clock_measurer_searches_serially() {
        assert!(tuner().search_config().parallel);

        let host = TileTuner::new(
            Target::nvidia_a100(),
            Box::new(NaiveTileConfigDatabase::new()),
            Arc::new(HostMeasurer::for_level(TuneLevel::Fast)),
            TunerConfig {
                level: TuneLevel::Fast,
                ..TunerConfig::default()
            },
        );
        assert!(host.config().parallel);
        assert!(!host.search_config().parallel);
        assert_eq!(host.search_config().strategy, SearchConfig::fast().strategy);
    }

    #[test]
    fn test_shape_mismatch_propagates() {
        let mut t = tuner();
        let program = build_reduce_sum(64, -1);
        assert!(matches!(
            t.tune_bucket(&program, &bucket()),
            Err(TuneError::ShapeMismatch { .. })
        ));
    }
}
