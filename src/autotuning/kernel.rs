//! Host reduce kernel used to measure tile configurations on the CPU.
//!
//! The tile config is lowered onto rayon tasks: one task per block of
//! `rows_per_block` rows, `tree_reduce_num` strided partial sums per row
//! combined pairwise. It is not a GPU, but the cost still moves with every
//! tile parameter, which is what the searcher needs from an oracle.

use rayon::prelude::*;

use crate::autotuning::measure::{
    bench_fn_bandwidth, check_launch, consume, BenchConfig, Measurer,
};
use crate::autotuning::search_space::TileConfig;
use crate::autotuning::TuneLevel;
use crate::program::ProgramInstance;
use crate::target::Target;
use crate::types::MeasureError;

/// Largest input the host measurer allocates, in elements.
pub const MAX_HOST_ELEMS: usize = 1 << 26;

/// Reduce each row of a row-major `[rows, cols]` matrix into `out`.
pub fn tiled_reduce_sum(
    input: &[f32],
    cols: usize,
    rows_per_task: usize,
    lanes: usize,
    out: &mut [f32],
) {
    let rows_per_task = rows_per_task.max(1);
    let lanes = lanes.max(1);
    out.par_chunks_mut(rows_per_task)
        .enumerate()
        .for_each(|(task, out_rows)| {
            let mut partial = vec![0.0f32; lanes];
            for (i, slot) in out_rows.iter_mut().enumerate() {
                let row = task * rows_per_task + i;
                let data = &input[row * cols..(row + 1) * cols];
                partial.iter_mut().for_each(|p| *p = 0.0);
                for (j, &x) in data.iter().enumerate() {
                    partial[j % lanes] += x;
                }
                *slot = tree_combine(&mut partial);
            }
        });
}

/// Pairwise reduction over a power-of-two (or any) number of lanes.
fn tree_combine(partial: &mut [f32]) -> f32 {
    let mut width = partial.len();
    while width > 1 {
        let half = width.div_ceil(2);
        for i in 0..width / 2 {
            partial[i] += partial[i + half];
        }
        width = half;
    }
    partial.first().copied().unwrap_or(0.0)
}

/// Element `i` of the host input. Small integers, so row sums are exact in `u64`.
#[inline]
fn input_value(i: usize) -> u64 {
    (i % 7) as u64
}

/// Compare the kernel's sum of row 0 against the exact integer sum.
///
/// Each lane accumulates `cols / lanes` values serially before the tree
/// combine, so the f32 result may be off by about that many roundings.
fn check_row_sum(got: f32, cols: usize, lanes: usize) -> Result<(), MeasureError> {
    let expected: u64 = (0..cols).map(input_value).sum();
    let lanes = lanes.max(1);
    let roundings = cols.div_ceil(lanes) + lanes.ilog2() as usize + 1;
    let rel = (roundings as f64 * f32::EPSILON as f64).min(0.5);
    let tolerance = rel * expected as f64 + 1.0;
    if (got as f64 - expected as f64).abs() > tolerance {
        return Err(MeasureError::ExecutionFailed(format!(
            "row 0 sum {got} != {expected}"
        )));
    }
    Ok(())
}

/// Times the host kernel for each (shape, config) pair.
#[derive(Debug, Clone)]
pub struct HostMeasurer {
    pub bench: BenchConfig,
}

impl Default for HostMeasurer {
    fn default() -> Self {
        HostMeasurer {
            bench: BenchConfig::fast(),
        }
    }
}

impl HostMeasurer {
    pub fn new(bench: BenchConfig) -> Self {
        HostMeasurer { bench }
    }

    /// Timing effort matched to the tuning level.
    pub fn for_level(level: TuneLevel) -> Self {
        let bench = match level {
            TuneLevel::Fast => BenchConfig::fast(),
            TuneLevel::Default => BenchConfig::default(),
            TuneLevel::Thorough => BenchConfig::precise(),
        };
        Self::new(bench)
    }
}

impl Measurer for HostMeasurer {
    fn name(&self) -> &str {
        "host"
    }

    fn parallel_safe(&self) -> bool {
        false
    }

    fn measure(
        &self,
        instance: &ProgramInstance<'_>,
        config: &TileConfig,
        target: &Target,
    ) -> Result<f64, MeasureError> {
        check_launch(config, target)?;
        let rows = instance.spatial_size();
        let cols = instance.reduce_size();
        let elems = rows.saturating_mul(cols);
        if elems > MAX_HOST_ELEMS {
            return Err(MeasureError::OutOfResource {
                resource: "host input elements",
                needed: elems,
                limit: MAX_HOST_ELEMS,
            });
        }

        let input: Vec<f32> = (0..elems).map(|i| input_value(i) as f32).collect();
        let mut out = vec![0.0f32; rows];
        let rows_per_task = config.rows_per_block(target);
        let lanes = config.tree_reduce_num;

        let bytes = (elems * std::mem::size_of::<f32>()) as u64;
        let result = bench_fn_bandwidth(&self.bench, bytes, |_| {
            tiled_reduce_sum(&input, cols, rows_per_task, lanes, &mut out);
            consume(out.first().copied());
        });

        if rows > 0 {
            check_row_sum(out[0], cols, lanes)?;
        }

        log::debug!(
            "host {}x{} {config}: {result}",
            rows,
            cols
        );
        Ok(result.median_ns / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::build_reduce_sum;

    #[test]
    fn test_tiled_reduce_matches_sequential() {
        let rows = 13;
        let cols = 37;
        let input: Vec<f32> = (0..rows * cols).map(|i| (i % 5) as f32).collect();
        for &(rpt, lanes) in &[(1, 1), (4, 8), (13, 32), (3, 5)] {
            let mut out = vec![0.0; rows];
            tiled_reduce_sum(&input, cols, rpt, lanes, &mut out);
            for r in 0..rows {
                let expected: f32 = input[r * cols..(r + 1) * cols].iter().sum();
                assert_eq!(out[r], expected, "rpt={rpt} lanes={lanes} row={r}");
            }
        }
    }

    #[test]
    fn test_tree_combine_odd_width() {
        let mut p = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(tree_combine(&mut p), 15.0);
        assert_eq!(tree_combine(&mut []), 0.0);
    }

    #[test]
    fn test_host_measurer_reports_positive_cost() {
        let target = Target::nvidia_a100();
        let p = build_reduce_sum(8, -1);
        let inst = p.instantiate(&[8, 256]).unwrap();
        let cost = HostMeasurer::default()
            .measure(&inst, &TileConfig::new(1, 32, 1), &target)
            .unwrap();
        assert!(cost >= 0.0);
    }

    #[test]
    fn test_row_sum_check() {
        assert!(check_row_sum(10.0, 5, 1).is_ok());
        assert!(check_row_sum(12.0, 5, 1).is_err());
        // 8M elements sum to 24_000_000; f32 cannot hold every step exactly.
        assert!(check_row_sum(23_999_996.0, 8_000_000, 256).is_ok());
        assert!(check_row_sum(12_000_000.0, 8_000_000, 256).is_err());
    }

    #[test]
    fn test_host_measurer_long_rows() {
        let target = Target::nvidia_a100();
        let p = build_reduce_sum(1, -1);
        let inst = p.instantiate(&[1, 8_000_000]).unwrap();
        let m = HostMeasurer::new(BenchConfig {
            warmup_iters: 0,
            min_iters: 1,
            max_iters: 2,
            min_time_ns: 0,
            max_time_ns: 1_000_000_000,
        });
        for cfg in [
            TileConfig::new(1, 1, 1),
            TileConfig::new(8, 256, 1),
            TileConfig::new(32, 1024, 1),
        ] {
            assert!(m.measure(&inst, &cfg, &target).is_ok(), "{cfg}");
        }
    }

    #[test]
    fn test_bench_effort_follows_level() {
        let fast = HostMeasurer::for_level(TuneLevel::Fast).bench;
        let precise = HostMeasurer::for_level(TuneLevel::Thorough).bench;
        assert_eq!(fast.min_iters, BenchConfig::fast().min_iters);
        assert_eq!(precise.min_iters, BenchConfig::precise().min_iters);
        let default = HostMeasurer::for_level(TuneLevel::Default).bench;
        assert!(precise.min_time_ns > default.min_time_ns);
        assert!(!HostMeasurer::default().parallel_safe());
    }

    #[test]
    fn test_host_measurer_checks_launch() {
        let target = Target::nvidia_a100();
        let p = build_reduce_sum(8, -1);
        let inst = p.instantiate(&[8, 64]).unwrap();
        assert!(HostMeasurer::default()
            .measure(&inst, &TileConfig::new(64, 32, 1), &target)
            .is_err());
    }
}
