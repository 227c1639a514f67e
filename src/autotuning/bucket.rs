//! Shape buckets: rectangular regions of an iteration space that share one
//! tile configuration.
//!
//! Each dimension carries a sampling distribution over its widths. Only
//! dynamic dimensions are swept; a static dimension always has effective
//! width 1 and is sampled at its lower bound.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{TuneError, TuneResult};

/// Role of an iteration-space axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AxisTag {
    #[serde(rename = "S")]
    Spatial,
    #[serde(rename = "R")]
    Reduce,
}

impl AxisTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisTag::Spatial => "S",
            AxisTag::Reduce => "R",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S" | "s" => Some(AxisTag::Spatial),
            "R" | "r" => Some(AxisTag::Reduce),
            _ => None,
        }
    }
}

impl fmt::Display for AxisTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One axis of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub lower: i64,
    pub upper: i64,
    pub tag: AxisTag,
    pub is_dynamic: bool,
    /// Sampling weight per width in `[lower, upper]`; a single entry when static.
    pub weights: Vec<f64>,
}

impl Dimension {
    pub fn new(
        lower: i64,
        upper: i64,
        tag: AxisTag,
        is_dynamic: bool,
        weights: Vec<f64>,
    ) -> TuneResult<Self> {
        let dim = Dimension {
            lower,
            upper,
            tag,
            is_dynamic,
            weights,
        };
        dim.validate(0)?;
        Ok(dim)
    }

    /// Dimension with equal weight on every width.
    pub fn uniform(lower: i64, upper: i64, tag: AxisTag, is_dynamic: bool) -> TuneResult<Self> {
        let n = if is_dynamic && upper >= lower {
            (upper - lower + 1) as usize
        } else {
            1
        };
        Self::new(lower, upper, tag, is_dynamic, vec![1.0 / n as f64; n])
    }

    fn validate(&self, index: usize) -> TuneResult<()> {
        let fail = |reason: String| Err(TuneError::InvalidDimension { index, reason });
        if self.lower > self.upper {
            return fail(format!("lower {} > upper {}", self.lower, self.upper));
        }
        if self.lower <= 0 {
            return fail(format!("lower bound {} must be positive", self.lower));
        }
        let expected = self.effective_width();
        if self.weights.len() != expected {
            return fail(format!(
                "{} sampling weights, expected {}",
                self.weights.len(),
                expected
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return fail("sampling weights must be finite and non-negative".into());
        }
        if self.weights.iter().sum::<f64>() <= 0.0 {
            return fail("sampling weights sum to zero".into());
        }
        Ok(())
    }

    /// Number of widths swept along this axis. Static axes are never tiled.
    #[inline]
    pub fn effective_width(&self) -> usize {
        if self.is_dynamic {
            (self.upper - self.lower + 1) as usize
        } else {
            1
        }
    }

    /// Values a sampler may draw along this axis.
    pub fn sample_values(&self) -> impl Iterator<Item = i64> + '_ {
        let end = if self.is_dynamic { self.upper } else { self.lower };
        self.lower..=end
    }

    /// Normalised sampling probability of `value`.
    pub fn probability(&self, value: i64) -> f64 {
        if !self.is_dynamic {
            return if value == self.lower { 1.0 } else { 0.0 };
        }
        if value < self.lower || value > self.upper {
            return 0.0;
        }
        let total: f64 = self.weights.iter().sum();
        self.weights[(value - self.lower) as usize] / total
    }

    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn key(&self) -> DimensionKey {
        DimensionKey {
            tag: self.tag,
            lower: self.lower,
            upper: self.upper,
            is_dynamic: self.is_dynamic,
        }
    }
}

/// Identity of one dimension for database indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    pub tag: AxisTag,
    pub lower: i64,
    pub upper: i64,
    pub is_dynamic: bool,
}

impl DimensionKey {
    #[inline]
    pub fn encloses(&self, other: &DimensionKey) -> bool {
        self.tag == other.tag && self.lower <= other.lower && self.upper >= other.upper
    }
}

/// Canonical database key of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey(pub Vec<DimensionKey>);

impl BucketKey {
    /// True when every dimension of `other` lies within the matching dimension
    /// of `self` (same rank, same axis tags).
    pub fn encloses(&self, other: &BucketKey) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.encloses(b))
    }

    pub fn contains_shape(&self, shape: &[i64]) -> bool {
        self.0.len() == shape.len()
            && self
                .0
                .iter()
                .zip(shape)
                .all(|(d, &v)| v >= d.lower && v <= d.upper)
    }

    /// Number of concrete shapes covered.
    pub fn volume(&self) -> u128 {
        self.0
            .iter()
            .map(|d| (d.upper - d.lower + 1) as u128)
            .product()
    }

    pub fn iter_space_type(&self) -> IterSpaceType {
        IterSpaceType(self.0.iter().map(|d| (d.tag, d.is_dynamic)).collect())
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(
                f,
                "{}[{},{}]{}",
                d.tag,
                d.lower,
                d.upper,
                if d.is_dynamic { "d" } else { "s" }
            )?;
        }
        Ok(())
    }
}

/// Shape category of an iteration space: axis tag and dynamism per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterSpaceType(pub Vec<(AxisTag, bool)>);

impl IterSpaceType {
    /// File-system safe name, e.g. `S_static__R_dynamic`.
    pub fn file_stem(&self) -> String {
        self.0
            .iter()
            .map(|(tag, dynamic)| {
                format!("{}_{}", tag, if *dynamic { "dynamic" } else { "static" })
            })
            .collect::<Vec<_>>()
            .join("__")
    }
}

impl fmt::Display for IterSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(tag, dynamic)| {
                format!("{}:{}", tag, if *dynamic { "dynamic" } else { "static" })
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// A multi-dimensional bucket of the iteration space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub space: Vec<Dimension>,
}

impl BucketInfo {
    pub fn new(space: Vec<Dimension>) -> TuneResult<Self> {
        if space.is_empty() {
            return Err(TuneError::InvalidBucket("bucket has no dimensions".into()));
        }
        for (i, dim) in space.iter().enumerate() {
            dim.validate(i)?;
        }
        Ok(BucketInfo { space })
    }

    pub fn rank(&self) -> usize {
        self.space.len()
    }

    pub fn key(&self) -> BucketKey {
        BucketKey(self.space.iter().map(Dimension::key).collect())
    }

    pub fn iter_space_type(&self) -> IterSpaceType {
        IterSpaceType(self.space.iter().map(|d| (d.tag, d.is_dynamic)).collect())
    }

    /// Does the concrete shape fall inside this bucket?
    pub fn contains(&self, shape: &[i64]) -> bool {
        shape.len() == self.space.len()
            && self.space.iter().zip(shape).all(|(d, &v)| d.contains(v))
    }

    /// Number of concrete shapes covered.
    pub fn volume(&self) -> u128 {
        self.key().volume()
    }

    pub fn encloses(&self, other: &BucketInfo) -> bool {
        self.key().encloses(&other.key())
    }

    /// Number of distinct shapes a sampler can draw.
    pub fn sample_volume(&self) -> u128 {
        self.space.iter().map(|d| d.effective_width() as u128).product()
    }

    /// Largest extent along axes with the given tag, multiplied together.
    pub fn upper_extent(&self, tag: AxisTag) -> i64 {
        self.space
            .iter()
            .filter(|d| d.tag == tag)
            .map(|d| d.upper)
            .product()
    }
}

/// Step function choosing a bucket width from its lower bound: narrow
/// buckets where small extents change the best schedule quickly, wide ones
/// further out.
pub fn get_tile_size_config(dimension_lower: i64) -> i64 {
    if dimension_lower < 128 {
        32
    } else if dimension_lower < 512 {
        128
    } else if dimension_lower < 1024 {
        256
    } else if dimension_lower < 2048 {
        512
    } else {
        1024
    }
}

/// Range swept along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSweep {
    pub tag: AxisTag,
    pub left: i64,
    pub right: i64,
    pub is_dynamic: bool,
}

/// Cartesian sweep of buckets over several axes.
///
/// Lower bounds advance by `get_tile_size_config(lower)`. A dynamic axis
/// gets a bucket of that width; a static axis gets width 1.
#[derive(Debug, Clone)]
pub struct BucketSweep {
    pub axes: Vec<AxisSweep>,
}

impl BucketSweep {
    pub fn new(axes: Vec<AxisSweep>) -> TuneResult<Self> {
        if axes.is_empty() {
            return Err(TuneError::InvalidBucket("sweep has no axes".into()));
        }
        for (i, a) in axes.iter().enumerate() {
            if a.left > a.right || a.left <= 0 {
                return Err(TuneError::InvalidDimension {
                    index: i,
                    reason: format!("sweep range [{}, {}] is empty", a.left, a.right),
                });
            }
        }
        Ok(BucketSweep { axes })
    }

    /// Spatial × reduce sweep as used for 2-D reductions.
    pub fn spatial_reduce(
        spatial: (i64, i64),
        is_spatial_dynamic: bool,
        reduce: (i64, i64),
        is_reduce_dynamic: bool,
    ) -> TuneResult<Self> {
        Self::new(vec![
            AxisSweep {
                tag: AxisTag::Spatial,
                left: spatial.0,
                right: spatial.1,
                is_dynamic: is_spatial_dynamic,
            },
            AxisSweep {
                tag: AxisTag::Reduce,
                left: reduce.0,
                right: reduce.1,
                is_dynamic: is_reduce_dynamic,
            },
        ])
    }

    fn axis_dimensions(axis: &AxisSweep) -> TuneResult<Vec<Dimension>> {
        let mut dims = Vec::new();
        let mut lower = axis.left;
        while lower <= axis.right {
            let step = get_tile_size_config(lower);
            let width = if axis.is_dynamic { step } else { 1 };
            dims.push(Dimension::uniform(
                lower,
                lower + width - 1,
                axis.tag,
                axis.is_dynamic,
            )?);
            lower += step;
        }
        Ok(dims)
    }

    /// All buckets, outer axis slowest.
    pub fn buckets(&self) -> TuneResult<Vec<BucketInfo>> {
        let mut out: Vec<Vec<Dimension>> = vec![Vec::new()];
        for axis in &self.axes {
            let dims = Self::axis_dimensions(axis)?;
            let mut next = Vec::with_capacity(out.len() * dims.len());
            for prefix in &out {
                for d in &dims {
                    let mut space = prefix.clone();
                    space.push(d.clone());
                    next.push(space);
                }
            }
            out = next;
        }
        out.into_iter().map(BucketInfo::new).collect()
    }
}
