//! tile-tuner CLI
//!
//! ```bash
//! # Tune one bucket: S = 32 (static), R in [512, 767] (dynamic)
//! tile-tuner tune --spatial 32:32 --reduce 512:767 --reduce-dynamic
//!
//! # Sweep reduce extents 32..=1024 in step-function buckets
//! tile-tuner sweep --spatial 32:32 --reduce 32:1024 --reduce-dynamic --level fast
//!
//! # Show stored records and resolve a concrete shape
//! tile-tuner show --reduce-dynamic --shape 32,700
//! ```
//!
//! Set `RUST_LOG=info` to follow the search.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use tile_tuner::autotuning::{
    AxisTag, BucketSweep, Dimension, FailurePolicy, FileTileConfigDatabase, HostMeasurer,
    IterSpaceType, Measurer, ScheduleConfigManager, SimulatedMeasurer, TileConfigDatabase,
    TileTuner, TuneLevel,
};
use tile_tuner::{BucketInfo, Target, TensorProgram, TuneError, TuneResult, TunerConfig};

#[derive(Parser)]
#[clap(name = "tile-tuner")]
#[clap(about = "Search-based tile configuration tuning for reduce schedules")]
#[clap(version)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MeasurerKind {
    /// Analytic GPU cost model
    Simulated,
    /// Time a CPU reduce kernel
    Host,
}

#[derive(clap::Args)]
struct TuneOpts {
    /// Target preset (a100, rtx3070, mi250)
    #[clap(long, default_value = "a100")]
    target: String,

    /// Spatial extent range, LOWER:UPPER
    #[clap(long, value_parser = parse_range, default_value = "32:32")]
    spatial: (i64, i64),

    /// Reduce extent range, LOWER:UPPER
    #[clap(long, value_parser = parse_range)]
    reduce: (i64, i64),

    #[clap(long)]
    spatial_dynamic: bool,

    #[clap(long)]
    reduce_dynamic: bool,

    #[clap(long, value_enum, default_value = "simulated")]
    measurer: MeasurerKind,

    /// fast, default or thorough (overrides TILE_TUNER_LEVEL)
    #[clap(long)]
    level: Option<TuneLevel>,

    /// Shapes sampled per bucket
    #[clap(long)]
    samples: Option<usize>,

    #[clap(long)]
    seed: Option<u64>,

    /// Drop failed samples instead of penalizing them
    #[clap(long)]
    exclude_failures: bool,

    /// Database directory (overrides TILE_TUNER_CONFIG_DIR)
    #[clap(long, value_name = "DIR")]
    db: Option<PathBuf>,

    /// Search even if the bucket is already stored
    #[clap(long)]
    retune: bool,

    /// Evaluate candidates one at a time
    #[clap(long)]
    sequential: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Tune a single bucket
    Tune(TuneOpts),

    /// Tune every bucket of a sweep, widths chosen by the step function
    Sweep(TuneOpts),

    /// Print stored records and, optionally, the config resolved for a shape
    Show {
        #[clap(long, default_value = "a100")]
        target: String,

        #[clap(long)]
        spatial_dynamic: bool,

        #[clap(long)]
        reduce_dynamic: bool,

        /// Concrete shape to resolve, SPATIAL,REDUCE
        #[clap(long, value_delimiter = ',')]
        shape: Vec<i64>,

        #[clap(long, value_name = "DIR")]
        db: Option<PathBuf>,
    },
}

fn parse_range(s: &str) -> Result<(i64, i64), String> {
    let (lo, hi) = s
        .split_once(':')
        .ok_or_else(|| format!("expected LOWER:UPPER, got '{s}'"))?;
    let lo = lo.trim().parse::<i64>().map_err(|e| e.to_string())?;
    let hi = hi.trim().parse::<i64>().map_err(|e| e.to_string())?;
    Ok((lo, hi))
}

fn resolve_target(name: &str) -> TuneResult<Target> {
    Target::from_name(name)
        .ok_or_else(|| TuneError::InvalidConfig(format!("unknown target '{name}'")))
}

fn tuner_config(opts: &TuneOpts) -> TuneResult<TunerConfig> {
    let mut cfg = TunerConfig::from_env()?;
    if let Some(level) = opts.level {
        cfg.level = level;
    }
    if let Some(n) = opts.samples {
        cfg.objective.num_samples = n;
    }
    if let Some(seed) = opts.seed {
        cfg.objective.seed = seed;
    }
    if opts.exclude_failures {
        cfg.objective.failure_policy = FailurePolicy::Exclude;
    }
    if let Some(db) = &opts.db {
        cfg.config_dir = db.clone();
    }
    cfg.parallel = !opts.sequential;
    Ok(cfg)
}

fn build_tuner(opts: &TuneOpts) -> TuneResult<TileTuner> {
    let target = resolve_target(&opts.target)?;
    let cfg = tuner_config(opts)?;
    let measurer: Arc<dyn Measurer> = match opts.measurer {
        MeasurerKind::Simulated => Arc::new(SimulatedMeasurer::new()),
        MeasurerKind::Host => Arc::new(HostMeasurer::for_level(cfg.level)),
    };
    log::info!(
        "target {} ({}), level {}, database {}",
        target.arch,
        target.fingerprint(),
        cfg.level,
        cfg.config_dir.display()
    );
    Ok(TileTuner::with_file_database(target, measurer, cfg).retune(opts.retune))
}

fn run_tune(opts: TuneOpts) -> TuneResult<()> {
    let mut tuner = build_tuner(&opts)?;
    let bucket = BucketInfo::new(vec![
        Dimension::uniform(opts.spatial.0, opts.spatial.1, AxisTag::Spatial, opts.spatial_dynamic)?,
        Dimension::uniform(opts.reduce.0, opts.reduce.1, AxisTag::Reduce, opts.reduce_dynamic)?,
    ])?;
    let program = TensorProgram::reduce_sum_for_bucket(&bucket);
    let report = tuner.tune_bucket(&program, &bucket)?;
    tuner.commit()?;
    println!("{}", report.report);
    Ok(())
}

fn run_sweep(opts: TuneOpts) -> TuneResult<()> {
    let mut tuner = build_tuner(&opts)?;
    let sweep = BucketSweep::spatial_reduce(
        opts.spatial,
        opts.spatial_dynamic,
        opts.reduce,
        opts.reduce_dynamic,
    )?;
    let reports = tuner.tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)?;

    println!("{:<28} {:<52} {:>12} {:>6}", "bucket", "config", "score", "evals");
    for r in &reports {
        println!(
            "{:<28} {:<52} {:>12.4} {:>6}{}",
            r.bucket.to_string(),
            r.config.to_string(),
            r.score,
            r.evaluations,
            if r.from_database { " (stored)" } else { "" }
        );
    }
    Ok(())
}

fn run_show(
    target: &str,
    spatial_dynamic: bool,
    reduce_dynamic: bool,
    shape: &[i64],
    db: Option<PathBuf>,
) -> TuneResult<()> {
    let target = resolve_target(target)?;
    let mut cfg = TunerConfig::from_env()?;
    if let Some(db) = db {
        cfg.config_dir = db;
    }
    let database = FileTileConfigDatabase::new(cfg.config_dir.clone());
    let iter_space = IterSpaceType(vec![
        (AxisTag::Spatial, spatial_dynamic),
        (AxisTag::Reduce, reduce_dynamic),
    ]);

    let map = database.get_configs(&target, &iter_space);
    println!(
        "{} records for {} / {} in {}",
        map.len(),
        target.fingerprint(),
        iter_space,
        database.partition_path(&target.fingerprint(), &iter_space).display()
    );
    for r in map.records() {
        println!("  {:<28} {} score={:.4}", r.bucket.to_string(), r.config, r.score);
    }

    if !shape.is_empty() {
        let mut manager = ScheduleConfigManager::new(target);
        manager.set_policy(cfg.policy.as_str())?;
        manager.add_configs(iter_space.clone(), map);
        let resolved = manager.get_config_for_shape(&iter_space, shape);
        println!(
            "{:?} -> {} ({:?}, policy {})",
            shape,
            resolved.config,
            resolved.source,
            manager.policy()
        );
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Commands::Tune(opts) => run_tune(opts),
        Commands::Sweep(opts) => run_sweep(opts),
        Commands::Show {
            target,
            spatial_dynamic,
            reduce_dynamic,
            shape,
            db,
        } => run_show(&target, spatial_dynamic, reduce_dynamic, &shape, db),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
