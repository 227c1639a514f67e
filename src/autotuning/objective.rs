//! Objective functions scoring a tile configuration over a shape bucket.
//!
//! An objective fixes a set of weighted sample shapes from the bucket when it
//! is built, then scores each candidate by the weighted mean measured cost
//! over those shapes. Both variants only differ in how the shapes are picked.

use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::autotuning::bucket::BucketInfo;
use crate::autotuning::measure::Measurer;
use crate::autotuning::search_space::TileConfig;
use crate::program::TensorProgram;
use crate::target::Target;
use crate::types::{MeasureError, TuneError, TuneResult};

/// Cost charged for a failed sample under the default policy.
pub const DEFAULT_FAILURE_PENALTY: f64 = 1e9;

/// What a failed compile or measurement contributes to a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// The sample counts with this cost.
    Penalize { cost: f64 },
    /// The sample is dropped from the weighted average.
    Exclude,
}

impl FailurePolicy {
    /// A penalty must be a finite, non-negative cost.
    pub fn validate(&self) -> TuneResult<()> {
        match *self {
            FailurePolicy::Penalize { cost } if !cost.is_finite() || cost < 0.0 => {
                Err(TuneError::InvalidConfig(format!(
                    "failure penalty {cost} must be finite and non-negative"
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Penalize {
            cost: DEFAULT_FAILURE_PENALTY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    pub num_samples: usize,
    pub seed: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        ObjectiveConfig {
            num_samples: 16,
            seed: 42,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// A concrete shape drawn from a bucket and its weight in the score.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSample {
    pub shape: Vec<i64>,
    pub weight: f64,
}

/// Outcome of scoring one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Weighted mean cost; `f64::INFINITY` when no sample succeeded.
    pub score: f64,
    pub succeeded: usize,
    pub failed: usize,
}

impl Evaluation {
    /// At least one sample compiled and ran.
    #[inline]
    pub fn is_viable(&self) -> bool {
        self.succeeded > 0
    }
}

/// Scores candidate configurations. Lower is better.
pub trait ObjectiveFunc: Send + Sync {
    fn evaluate(&self, candidate: &TileConfig) -> Evaluation;

    /// Shapes the score is computed over.
    fn samples(&self) -> &[WeightedSample];
}

/// State shared by the sampling objectives.
struct SampledCost {
    program: TensorProgram,
    target: Target,
    measurer: Arc<dyn Measurer>,
    samples: Vec<WeightedSample>,
    policy: FailurePolicy,
}

impl SampledCost {
    fn new(
        program: TensorProgram,
        target: Target,
        measurer: Arc<dyn Measurer>,
        samples: Vec<WeightedSample>,
        policy: FailurePolicy,
    ) -> TuneResult<Self> {
        policy.validate()?;
        if samples.is_empty() {
            return Err(TuneError::InvalidBucket("objective has no samples".into()));
        }
        for s in &samples {
            program.instantiate(&s.shape)?;
        }
        Ok(SampledCost {
            program,
            target,
            measurer,
            samples,
            policy,
        })
    }

    fn measure_one(&self, shape: &[i64], candidate: &TileConfig) -> Result<f64, MeasureError> {
        let instance = self
            .program
            .instantiate(shape)
            .map_err(|e| MeasureError::CompileFailed(e.to_string()))?;
        let cost = self.measurer.measure(&instance, candidate, &self.target)?;
        if !cost.is_finite() || cost < 0.0 {
            return Err(MeasureError::ExecutionFailed(format!("invalid cost {cost}")));
        }
        Ok(cost)
    }

    fn evaluate(&self, candidate: &TileConfig) -> Evaluation {
        let mut total = 0.0;
        let mut total_weight = 0.0;
        let mut succeeded = 0;
        let mut failed = 0;

        for sample in &self.samples {
            match self.measure_one(&sample.shape, candidate) {
                Ok(cost) => {
                    total += sample.weight * cost;
                    total_weight += sample.weight;
                    succeeded += 1;
                }
                Err(e) => {
                    log::debug!(
                        "{} on {:?} with {}: {e}",
                        self.measurer.name(),
                        sample.shape,
                        candidate
                    );
                    failed += 1;
                    if let FailurePolicy::Penalize { cost } = self.policy {
                        total += sample.weight * cost;
                        total_weight += sample.weight;
                    }
                }
            }
        }

        let score = if succeeded == 0 || total_weight <= 0.0 {
            f64::INFINITY
        } else {
            total / total_weight
        };
        Evaluation {
            score,
            succeeded,
            failed,
        }
    }
}

fn sample_weight(bucket: &BucketInfo, shape: &[i64]) -> f64 {
    bucket
        .space
        .iter()
        .zip(shape)
        .map(|(d, &v)| d.probability(v))
        .product()
}

fn check_rank(program: &TensorProgram, bucket: &BucketInfo) -> TuneResult<()> {
    if program.rank() != bucket.rank() {
        return Err(TuneError::InvalidBucket(format!(
            "bucket rank {} does not match program {} rank {}",
            bucket.rank(),
            program.name,
            program.rank()
        )));
    }
    Ok(())
}

/// Seeded weighted random sampling over the bucket's dynamic dimensions.
///
/// `num_samples` shapes are drawn once at construction; static dimensions are
/// pinned to their lower bound.
pub struct WeightedSamplingTrailObjectiveFunc {
    inner: SampledCost,
}

impl WeightedSamplingTrailObjectiveFunc {
    pub fn new(
        program: TensorProgram,
        bucket: &BucketInfo,
        target: Target,
        measurer: Arc<dyn Measurer>,
        config: &ObjectiveConfig,
    ) -> TuneResult<Self> {
        check_rank(&program, bucket)?;
        if config.num_samples == 0 {
            return Err(TuneError::InvalidConfig("num_samples must be positive".into()));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let dists = bucket
            .space
            .iter()
            .map(|d| {
                if d.is_dynamic {
                    WeightedIndex::new(&d.weights)
                        .map(Some)
                        .map_err(|e| TuneError::InvalidBucket(e.to_string()))
                } else {
                    Ok(None)
                }
            })
            .collect::<TuneResult<Vec<_>>>()?;

        let samples = (0..config.num_samples)
            .map(|_| {
                let shape: Vec<i64> = bucket
                    .space
                    .iter()
                    .zip(&dists)
                    .map(|(d, dist)| match dist {
                        Some(dist) => d.lower + dist.sample(&mut rng) as i64,
                        None => d.lower,
                    })
                    .collect();
                let weight = sample_weight(bucket, &shape);
                WeightedSample { shape, weight }
            })
            .collect();

        Ok(WeightedSamplingTrailObjectiveFunc {
            inner: SampledCost::new(program, target, measurer, samples, config.failure_policy)?,
        })
    }
}

impl ObjectiveFunc for WeightedSamplingTrailObjectiveFunc {
    fn evaluate(&self, candidate: &TileConfig) -> Evaluation {
        self.inner.evaluate(candidate)
    }

    fn samples(&self) -> &[WeightedSample] {
        &self.inner.samples
    }
}

/// Deterministic sampling of every `stride`-th width per dynamic dimension,
/// bounds always included.
pub struct GridSamplingObjectiveFunc {
    inner: SampledCost,
}

impl GridSamplingObjectiveFunc {
    pub fn new(
        program: TensorProgram,
        bucket: &BucketInfo,
        target: Target,
        measurer: Arc<dyn Measurer>,
        stride: usize,
        policy: FailurePolicy,
    ) -> TuneResult<Self> {
        check_rank(&program, bucket)?;
        let stride = stride.max(1);

        let mut shapes: Vec<Vec<i64>> = vec![Vec::new()];
        for d in &bucket.space {
            let mut values: Vec<i64> = d.sample_values().step_by(stride).collect();
            let last = if d.is_dynamic { d.upper } else { d.lower };
            if values.last() != Some(&last) {
                values.push(last);
            }
            shapes = shapes
                .iter()
                .flat_map(|prefix| {
                    values.iter().map(move |&v| {
                        let mut s = prefix.clone();
                        s.push(v);
                        s
                    })
                })
                .collect();
        }

        let samples = shapes
            .into_iter()
            .map(|shape| {
                let weight = sample_weight(bucket, &shape);
                WeightedSample { shape, weight }
            })
            .filter(|s| s.weight > 0.0)
            .collect();

        Ok(GridSamplingObjectiveFunc {
            inner: SampledCost::new(program, target, measurer, samples, policy)?,
        })
    }
}

impl ObjectiveFunc for GridSamplingObjectiveFunc {
    fn evaluate(&self, candidate: &TileConfig) -> Evaluation {
        self.inner.evaluate(candidate)
    }

    fn samples(&self) -> &[WeightedSample] {
        &self.inner.samples
    }
}
