//! tile-tuner: search-based tile configuration tuning for reduce schedules.
//!
//! Given a reduction's iteration space split into shape buckets, the tuner
//! samples shapes from each bucket, scores candidate tile configurations
//! (warps per block, tree-reduce width, rows per thread group) with a
//! compile-and-measure oracle, and keeps the best one per bucket in a
//! database. The schedule generator later asks a
//! [`ScheduleConfigManager`](autotuning::ScheduleConfigManager) for the
//! configuration of a bucket or a concrete shape.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_tuner::autotuning::{
//!     BucketSweep, NaiveTileConfigDatabase, SimulatedMeasurer, TileTuner,
//! };
//! use tile_tuner::{Target, TensorProgram, TunerConfig};
//!
//! let mut tuner = TileTuner::new(
//!     Target::nvidia_a100(),
//!     Box::new(NaiveTileConfigDatabase::new()),
//!     Arc::new(SimulatedMeasurer::new()),
//!     TunerConfig::default(),
//! );
//! let sweep = BucketSweep::spatial_reduce((32, 32), false, (32, 1024), true)?;
//! let reports = tuner.tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)?;
//! # Ok::<(), tile_tuner::TuneError>(())
//! ```

pub mod autotuning;
pub mod config;
pub mod program;
pub mod target;
pub mod types;

pub use autotuning::{
    BucketInfo, Dimension, ScheduleConfigManager, TileConfig, TileTuner, TuneLevel, TuneReport,
};
pub use config::TunerConfig;
pub use program::{build_reduce_sum, TensorProgram};
pub use target::{default_target, Target};
pub use types::{MeasureError, TuneError, TuneResult};
