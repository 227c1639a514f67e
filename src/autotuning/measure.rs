//! Compile-and-measure oracles plus the timing harness they share.
//!
//! A [`Measurer`] turns (program instance, tile config) into a cost in
//! microseconds. [`SimulatedMeasurer`] is an analytic GPU model and is fully
//! deterministic; the host measurer in `kernel` runs a real CPU kernel and
//! times it with [`bench_fn`], which does warmup, outlier rejection and
//! median/IQR statistics.

use std::hint::black_box;
use std::time::Instant;

use crate::autotuning::search_space::TileConfig;
use crate::program::ProgramInstance;
use crate::target::Target;
use crate::types::MeasureError;

/// Compile-and-measure oracle. Lower cost is better.
pub trait Measurer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether several measurements may run at once. Wall-clock oracles
    /// return `false` so candidates are timed one at a time.
    fn parallel_safe(&self) -> bool {
        true
    }

    /// Cost of running `instance` scheduled with `config` on `target`, in
    /// microseconds.
    fn measure(
        &self,
        instance: &ProgramInstance<'_>,
        config: &TileConfig,
        target: &Target,
    ) -> Result<f64, MeasureError>;
}

/// Launch checks every oracle applies before generating code.
pub fn check_launch(config: &TileConfig, target: &Target) -> Result<(), MeasureError> {
    if config.warp_num == 0 || config.tree_reduce_num == 0 || config.spatial_inner_num == 0 {
        return Err(MeasureError::CompileFailed(format!(
            "zero-sized tile parameter in {config}"
        )));
    }
    let threads = config.threads_per_block(target);
    if threads > target.max_threads_per_block {
        return Err(MeasureError::OutOfResource {
            resource: "threads per block",
            needed: threads,
            limit: target.max_threads_per_block,
        });
    }
    let smem = config.shared_memory_bytes(target);
    if smem > target.max_shared_memory_per_block {
        return Err(MeasureError::OutOfResource {
            resource: "shared memory",
            needed: smem,
            limit: target.max_shared_memory_per_block,
        });
    }
    Ok(())
}

/// Resident threads per SM assumed by the occupancy model.
const THREADS_PER_SM: usize = 2048;
/// Cost of one serial accumulate step, in microseconds.
const STEP_US: f64 = 0.0015;
/// Cost of one tree level reduced with warp shuffles.
const SHUFFLE_LEVEL_US: f64 = 0.004;
/// Cost of one tree level reduced through shared memory with a barrier.
const BARRIER_LEVEL_US: f64 = 0.02;

/// Analytic cost model of a reduce kernel on a GPU.
///
/// Models wave quantization over SMs, per-thread serial accumulation, tree
/// reduction depth, memory coalescing along the reduce axis and launch
/// overhead. Deterministic for a given input.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedMeasurer;

impl SimulatedMeasurer {
    pub fn new() -> Self {
        SimulatedMeasurer
    }

    fn cost_us(
        &self,
        spatial: usize,
        reduce: usize,
        elem_bytes: usize,
        c: &TileConfig,
        t: &Target,
    ) -> f64 {
        let threads = c.threads_per_block(t);
        let rows_per_block = c.rows_per_block(t).max(1);
        let blocks = spatial.div_ceil(rows_per_block);

        let blocks_per_sm = t
            .max_blocks_per_sm
            .min(THREADS_PER_SM / threads.max(1))
            .max(1);
        let concurrent = t.num_sms * blocks_per_sm;
        let waves = blocks.div_ceil(concurrent) as f64;

        // Per-block compute: serial accumulation then the tree levels.
        let serial_steps = (c.spatial_inner_num * reduce.div_ceil(c.tree_reduce_num)) as f64;
        let levels = c.tree_reduce_num.trailing_zeros() as f64;
        let level_us = if c.tree_reduce_num > t.threads_per_warp {
            BARRIER_LEVEL_US
        } else {
            SHUFFLE_LEVEL_US
        };
        let tree_us = c.spatial_inner_num as f64 * levels * level_us;
        let compute = waves * (serial_steps * STEP_US + tree_us);

        // Lanes of a warp reading different rows break coalescing.
        let coalesced =
            c.tree_reduce_num.min(t.threads_per_warp) as f64 / t.threads_per_warp as f64;
        // Too few blocks leave SMs, and their share of bandwidth, idle.
        let bw_share = (blocks as f64 / t.num_sms as f64).min(1.0);
        let effective_bw = t.memory_bandwidth_gbs * 1e3 * bw_share * (0.2 + 0.8 * coalesced);
        let bytes = (spatial * reduce * elem_bytes + spatial * elem_bytes) as f64;
        let memory = bytes / effective_bw;

        t.launch_overhead_us + compute.max(memory)
    }
}

impl Measurer for SimulatedMeasurer {
    fn name(&self) -> &str {
        "simulated"
    }

    fn measure(
        &self,
        instance: &ProgramInstance<'_>,
        config: &TileConfig,
        target: &Target,
    ) -> Result<f64, MeasureError> {
        check_launch(config, target)?;
        Ok(self.cost_us(
            instance.spatial_size(),
            instance.reduce_size(),
            instance.elem_bytes(),
            config,
            target,
        ))
    }
}

// ── Timing harness ──────────────────────────────────────────────────────

/// Result of benchmarking a single configuration.
#[derive(Debug, Clone)]
pub struct BenchResult {
    /// Median time in nanoseconds
    pub median_ns: f64,
    /// Interquartile range
    pub iqr_ns: f64,
    pub min_ns: f64,
    pub samples: usize,
    /// Bandwidth in GB/s, when the byte count is known
    pub bandwidth_gbs: Option<f64>,
}

impl std::fmt::Display for BenchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "median={:.1}us IQR={:.1}us min={:.1}us",
            self.median_ns / 1000.0,
            self.iqr_ns / 1000.0,
            self.min_ns / 1000.0,
        )?;
        if let Some(bw) = self.bandwidth_gbs {
            write!(f, " {bw:.1}GB/s")?;
        }
        Ok(())
    }
}

/// Configuration for the benchmark harness.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub warmup_iters: usize,
    pub min_iters: usize,
    pub max_iters: usize,
    /// Minimum total measurement time in nanoseconds
    pub min_time_ns: u64,
    /// Timeout in nanoseconds
    pub max_time_ns: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            warmup_iters: 3,
            min_iters: 7,
            max_iters: 100,
            min_time_ns: 20_000_000,
            max_time_ns: 1_000_000_000,
        }
    }
}

impl BenchConfig {
    /// Few iterations; enough to rank candidates.
    pub fn fast() -> Self {
        BenchConfig {
            warmup_iters: 1,
            min_iters: 3,
            max_iters: 15,
            min_time_ns: 2_000_000,
            max_time_ns: 100_000_000,
        }
    }

    pub fn precise() -> Self {
        BenchConfig {
            warmup_iters: 5,
            min_iters: 15,
            max_iters: 200,
            min_time_ns: 100_000_000,
            max_time_ns: 5_000_000_000,
        }
    }
}

/// Benchmark a closure, returning statistical results.
///
/// The closure receives the iteration index and should perform exactly one
/// invocation of the operation.
pub fn bench_fn<F>(config: &BenchConfig, mut f: F) -> BenchResult
where
    F: FnMut(usize),
{
    for i in 0..config.warmup_iters {
        f(i);
    }

    let mut times_ns = Vec::with_capacity(config.max_iters);
    let wall_start = Instant::now();
    let mut iter = 0usize;

    loop {
        let t0 = Instant::now();
        f(iter);
        times_ns.push(t0.elapsed().as_nanos() as f64);
        iter += 1;

        let total_wall = wall_start.elapsed().as_nanos() as u64;
        if iter >= config.min_iters && total_wall >= config.min_time_ns {
            break;
        }
        if iter >= config.max_iters || total_wall >= config.max_time_ns {
            break;
        }
    }

    compute_stats(&mut times_ns)
}

/// Benchmark with a byte count for bandwidth calculation.
pub fn bench_fn_bandwidth<F>(config: &BenchConfig, bytes: u64, f: F) -> BenchResult
where
    F: FnMut(usize),
{
    let mut result = bench_fn(config, f);
    if result.median_ns > 0.0 {
        result.bandwidth_gbs = Some(bytes as f64 / result.median_ns);
    }
    result
}

fn compute_stats(times: &mut [f64]) -> BenchResult {
    let n = times.len();
    if n == 0 {
        return BenchResult {
            median_ns: 0.0,
            iqr_ns: 0.0,
            min_ns: 0.0,
            samples: 0,
            bandwidth_gbs: None,
        };
    }

    times.sort_by(|a, b| a.total_cmp(b));

    // Discard the slowest 10% (scheduler interrupts).
    let trimmed_len = (n * 9 / 10).max(1);
    let trimmed = &times[..trimmed_len];

    let median = if trimmed_len % 2 == 0 {
        (trimmed[trimmed_len / 2 - 1] + trimmed[trimmed_len / 2]) / 2.0
    } else {
        trimmed[trimmed_len / 2]
    };
    let iqr = trimmed[trimmed_len * 3 / 4] - trimmed[trimmed_len / 4];

    BenchResult {
        median_ns: median,
        iqr_ns: iqr,
        min_ns: trimmed[0],
        samples: n,
        bandwidth_gbs: None,
    }
}

/// Keep a benchmark result alive past the optimizer.
#[inline(always)]
pub fn consume<T>(x: T) -> T {
    black_box(x)
}
