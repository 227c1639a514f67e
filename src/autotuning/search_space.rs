//! Candidate space for reduce tile configurations.
//!
//! Defines the tunable parameters and their valid ranges. The space is
//! constrained by hardware limits (warp width, threads per block, shared
//! memory) so the searcher never spends measurements on configurations the
//! target cannot launch.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::autotuning::bucket::{AxisTag, BucketInfo};
use crate::target::Target;
use crate::types::{TuneError, TuneResult};

/// Bytes of shared memory each thread's partial accumulator occupies.
pub const ACCUMULATOR_BYTES: usize = 4;

/// How a parameter advances from `min` to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Linear(usize),
    /// Powers of two between the bounds.
    Doubling,
}

/// A single tunable parameter with its valid range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRange {
    pub name: &'static str,
    pub min: usize,
    pub max: usize,
    pub step: Step,
}

impl ParamRange {
    pub fn linear(name: &'static str, min: usize, max: usize, step: usize) -> Self {
        ParamRange {
            name,
            min,
            max,
            step: Step::Linear(step.max(1)),
        }
    }

    pub fn doubling(name: &'static str, min: usize, max: usize) -> Self {
        ParamRange {
            name,
            min: min.max(1),
            max,
            step: Step::Doubling,
        }
    }

    /// Number of discrete values in this range.
    pub fn count(&self) -> usize {
        self.values().len()
    }

    /// Enumerate all values, ascending.
    pub fn values(&self) -> Vec<usize> {
        let mut v = Vec::new();
        if self.max < self.min {
            return v;
        }
        match self.step {
            Step::Linear(step) => {
                let mut val = self.min;
                while val <= self.max {
                    v.push(val);
                    val += step;
                }
            }
            Step::Doubling => {
                let mut val = self.min.next_power_of_two();
                while val <= self.max {
                    v.push(val);
                    val *= 2;
                }
            }
        }
        v
    }
}

/// A concrete tile configuration for a reduce schedule.
///
/// A block runs `warp_num` warps. Its threads are split into groups of
/// `tree_reduce_num` that cooperatively reduce one row; each group handles
/// `spatial_inner_num` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileConfig {
    pub warp_num: usize,
    pub tree_reduce_num: usize,
    pub spatial_inner_num: usize,
}

impl TileConfig {
    pub fn new(warp_num: usize, tree_reduce_num: usize, spatial_inner_num: usize) -> Self {
        TileConfig {
            warp_num,
            tree_reduce_num,
            spatial_inner_num,
        }
    }

    /// Parameters in declaration order.
    pub fn params(&self) -> [(&'static str, usize); 3] {
        [
            ("warp_num", self.warp_num),
            ("tree_reduce_num", self.tree_reduce_num),
            ("spatial_inner_num", self.spatial_inner_num),
        ]
    }

    #[inline]
    pub fn threads_per_block(&self, target: &Target) -> usize {
        self.warp_num * target.threads_per_warp
    }

    /// Rows of the spatial axis covered by one block.
    pub fn rows_per_block(&self, target: &Target) -> usize {
        (self.threads_per_block(target) / self.tree_reduce_num.max(1)) * self.spatial_inner_num
    }

    /// Shared memory needed for the tree reduction's partial sums.
    pub fn shared_memory_bytes(&self, target: &Target) -> usize {
        self.threads_per_block(target) * self.spatial_inner_num * ACCUMULATOR_BYTES
    }
}

impl fmt::Display for TileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "warp_num={} tree_reduce_num={} spatial_inner_num={}",
            self.warp_num, self.tree_reduce_num, self.spatial_inner_num
        )
    }
}

type Predicate = Arc<dyn Fn(&TileConfig) -> bool + Send + Sync>;

/// A legality rule applied to every candidate before it is scored.
#[derive(Clone)]
pub enum Constraint {
    /// Block size must not exceed `limit` threads.
    MaxThreadsPerBlock { threads_per_warp: usize, limit: usize },
    /// `tree_reduce_num` must divide the warp width or be a whole number of warps.
    WarpAligned { threads_per_warp: usize },
    /// `tree_reduce_num` must divide the block size.
    TreeReduceDividesBlock { threads_per_warp: usize },
    /// Partial sums must fit the per-block shared memory budget.
    SharedMemory { threads_per_warp: usize, limit_bytes: usize },
    Custom { name: String, pred: Predicate },
}

impl Constraint {
    pub fn custom(
        name: impl Into<String>,
        pred: impl Fn(&TileConfig) -> bool + Send + Sync + 'static,
    ) -> Self {
        Constraint::Custom {
            name: name.into(),
            pred: Arc::new(pred),
        }
    }

    pub fn allows(&self, cfg: &TileConfig) -> bool {
        match self {
            Constraint::MaxThreadsPerBlock {
                threads_per_warp,
                limit,
            } => cfg.warp_num > 0 && cfg.warp_num * threads_per_warp <= *limit,
            Constraint::WarpAligned { threads_per_warp } => {
                let t = cfg.tree_reduce_num;
                t > 0
                    && if t <= *threads_per_warp {
                        threads_per_warp % t == 0
                    } else {
                        t % threads_per_warp == 0
                    }
            }
            Constraint::TreeReduceDividesBlock { threads_per_warp } => {
                let block = cfg.warp_num * threads_per_warp;
                cfg.tree_reduce_num > 0 && block % cfg.tree_reduce_num == 0
            }
            Constraint::SharedMemory {
                threads_per_warp,
                limit_bytes,
            } => {
                cfg.warp_num * threads_per_warp * cfg.spatial_inner_num * ACCUMULATOR_BYTES
                    <= *limit_bytes
            }
            Constraint::Custom { pred, .. } => pred(cfg),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::MaxThreadsPerBlock { limit, .. } => {
                write!(f, "MaxThreadsPerBlock({limit})")
            }
            Constraint::WarpAligned { threads_per_warp } => {
                write!(f, "WarpAligned({threads_per_warp})")
            }
            Constraint::TreeReduceDividesBlock { .. } => f.write_str("TreeReduceDividesBlock"),
            Constraint::SharedMemory { limit_bytes, .. } => {
                write!(f, "SharedMemory({limit_bytes})")
            }
            Constraint::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

/// Search space for one bucket on one target.
#[derive(Debug, Clone)]
pub struct CandidateSpace {
    pub warp_range: ParamRange,
    pub tree_reduce_range: ParamRange,
    pub spatial_inner_range: ParamRange,
    pub constraints: Vec<Constraint>,
}

impl CandidateSpace {
    /// Space with explicit ranges and no constraints.
    pub fn new(
        warp_range: ParamRange,
        tree_reduce_range: ParamRange,
        spatial_inner_range: ParamRange,
    ) -> TuneResult<Self> {
        for r in [&warp_range, &tree_reduce_range, &spatial_inner_range] {
            if r.count() == 0 {
                return Err(TuneError::InvalidSearchSpace(format!(
                    "parameter {} has no values in [{}, {}]",
                    r.name, r.min, r.max
                )));
            }
            if r.min == 0 {
                return Err(TuneError::InvalidSearchSpace(format!(
                    "parameter {} must start at 1",
                    r.name
                )));
            }
        }
        Ok(CandidateSpace {
            warp_range,
            tree_reduce_range,
            spatial_inner_range,
            constraints: Vec::new(),
        })
    }

    /// Hardware-constrained space for a reduce over `bucket` on `target`.
    ///
    /// The tree-reduce width is capped by the largest reduce extent and the
    /// inner spatial width by the largest spatial extent, both rounded up to
    /// a power of two.
    pub fn for_reduce(target: &Target, bucket: &BucketInfo) -> TuneResult<Self> {
        let reduce_hi = bucket.upper_extent(AxisTag::Reduce).max(1) as usize;
        let spatial_hi = bucket.upper_extent(AxisTag::Spatial).max(1) as usize;

        let tree_max = reduce_hi
            .next_power_of_two()
            .min(target.max_threads_per_block);
        let inner_max = spatial_hi.next_power_of_two().min(16);

        let space = Self::new(
            ParamRange::doubling("warp_num", 1, target.max_warps_per_block()),
            ParamRange::doubling("tree_reduce_num", 1, tree_max),
            ParamRange::doubling("spatial_inner_num", 1, inner_max),
        )?;
        Ok(space.with_target_limits(target))
    }

    /// Add the warp, block and shared-memory rules of `target`.
    pub fn with_target_limits(self, target: &Target) -> Self {
        let warp = target.threads_per_warp;
        self.with_constraint(Constraint::MaxThreadsPerBlock {
            threads_per_warp: warp,
            limit: target.max_threads_per_block,
        })
        .with_constraint(Constraint::WarpAligned {
            threads_per_warp: warp,
        })
        .with_constraint(Constraint::TreeReduceDividesBlock {
            threads_per_warp: warp,
        })
        .with_constraint(Constraint::SharedMemory {
            threads_per_warp: warp,
            limit_bytes: target.max_shared_memory_per_block,
        })
    }

    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }

    pub fn is_legal(&self, cfg: &TileConfig) -> bool {
        self.constraints.iter().all(|c| c.allows(cfg))
    }

    /// Total number of configurations in the unconstrained grid.
    pub fn grid_size(&self) -> usize {
        self.warp_range.count() * self.tree_reduce_range.count() * self.spatial_inner_range.count()
    }

    /// Every legal configuration, in stable enumeration order.
    pub fn legal_candidates(&self) -> Vec<TileConfig> {
        self.cartesian(
            &self.warp_range.values(),
            &self.tree_reduce_range.values(),
            &self.spatial_inner_range.values(),
        )
    }

    /// Legal configurations on a grid taking every `stride`-th value per
    /// parameter. Range bounds are always included.
    pub fn coarse_grid(&self, stride: usize) -> Vec<TileConfig> {
        self.cartesian(
            &subsample(&self.warp_range.values(), stride),
            &subsample(&self.tree_reduce_range.values(), stride),
            &subsample(&self.spatial_inner_range.values(), stride),
        )
    }

    /// Legal configurations within `radius` steps of `center` in each
    /// parameter, excluding `center` itself.
    pub fn refine_around(&self, center: &TileConfig, radius: usize) -> Vec<TileConfig> {
        let ws = neighborhood(center.warp_num, &self.warp_range, radius);
        let ts = neighborhood(center.tree_reduce_num, &self.tree_reduce_range, radius);
        let ss = neighborhood(center.spatial_inner_num, &self.spatial_inner_range, radius);
        self.cartesian(&ws, &ts, &ss)
            .into_iter()
            .filter(|c| c != center)
            .collect()
    }

    fn cartesian(&self, ws: &[usize], ts: &[usize], ss: &[usize]) -> Vec<TileConfig> {
        let mut configs = Vec::new();
        for &w in ws {
            for &t in ts {
                for &s in ss {
                    let cfg = TileConfig::new(w, t, s);
                    if self.is_legal(&cfg) {
                        configs.push(cfg);
                    }
                }
            }
        }
        configs
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn subsample(values: &[usize], stride: usize) -> Vec<usize> {
    if values.len() <= 3 || stride <= 1 {
        return values.to_vec();
    }
    let mut result: Vec<usize> = values.iter().step_by(stride).copied().collect();
    if let Some(&last) = values.last() {
        if result.last() != Some(&last) {
            result.push(last);
        }
    }
    result
}

/// Values within `radius` positions of `center` in the range's enumeration.
/// A center outside the range snaps to the nearest value.
fn neighborhood(center: usize, range: &ParamRange, radius: usize) -> Vec<usize> {
    let values = range.values();
    if values.is_empty() {
        return values;
    }
    let idx = values.partition_point(|&v| v < center).min(values.len() - 1);
    let lo = idx.saturating_sub(radius);
    let hi = (idx + radius).min(values.len() - 1);
    values[lo..=hi].to_vec()
}
