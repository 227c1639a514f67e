//! Tensor program handle consumed by the objective functions.
//!
//! The tuner never inspects the IR; it only needs to know the iteration
//! space (extent and role of each axis) and to bind a concrete shape before
//! handing the program to a measurer.

use serde::{Deserialize, Serialize};

use crate::autotuning::bucket::{AxisTag, BucketInfo};
use crate::types::{TuneError, TuneResult};

/// Extent of one program axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Extent {
    Static(i64),
    Dynamic,
}

impl Extent {
    /// `-1` denotes a dynamic extent, matching the program builder's convention.
    pub fn from_dim(dim: i64) -> Self {
        if dim < 0 {
            Extent::Dynamic
        } else {
            Extent::Static(dim)
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Extent::Dynamic)
    }
}

/// Element type of the program's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }
}

/// One iteration-space axis of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis {
    pub extent: Extent,
    pub tag: AxisTag,
}

/// Opaque handle for a reduction-style tensor program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorProgram {
    pub name: String,
    pub axes: Vec<Axis>,
    pub dtype: DType,
}

/// A program bound to concrete extents.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramInstance<'a> {
    pub program: &'a TensorProgram,
    pub shape: Vec<i64>,
}

impl<'a> ProgramInstance<'a> {
    /// Product of all spatial extents.
    pub fn spatial_size(&self) -> usize {
        self.product_of(AxisTag::Spatial)
    }

    /// Product of all reduce extents.
    pub fn reduce_size(&self) -> usize {
        self.product_of(AxisTag::Reduce)
    }

    pub fn elem_bytes(&self) -> usize {
        self.program.dtype.size_bytes()
    }

    fn product_of(&self, tag: AxisTag) -> usize {
        self.program
            .axes
            .iter()
            .zip(&self.shape)
            .filter(|(axis, _)| axis.tag == tag)
            .map(|(_, &d)| d as usize)
            .product()
    }
}

impl TensorProgram {
    pub fn new(name: impl Into<String>, axes: Vec<Axis>, dtype: DType) -> Self {
        TensorProgram {
            name: name.into(),
            axes,
            dtype,
        }
    }

    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Reduce-sum program whose axes follow `bucket`: dynamic dimensions
    /// stay dynamic, static ones are fixed at their lower bound.
    pub fn reduce_sum_for_bucket(bucket: &BucketInfo) -> Self {
        let axes: Vec<Axis> = bucket
            .space
            .iter()
            .map(|d| Axis {
                extent: if d.is_dynamic {
                    Extent::Dynamic
                } else {
                    Extent::Static(d.lower)
                },
                tag: d.tag,
            })
            .collect();
        let dims: Vec<String> = axes
            .iter()
            .map(|a| match a.extent {
                Extent::Static(n) => n.to_string(),
                Extent::Dynamic => "-1".to_string(),
            })
            .collect();
        TensorProgram::new(format!("reduce_sum_{}", dims.join("x")), axes, DType::F32)
    }

    /// Bind concrete extents. Static axes must match exactly; every extent
    /// must be positive.
    pub fn instantiate(&self, shape: &[i64]) -> TuneResult<ProgramInstance<'_>> {
        if shape.len() != self.axes.len() {
            return Err(self.mismatch(
                shape,
                format!("rank {} != program rank {}", shape.len(), self.axes.len()),
            ));
        }
        for (i, (axis, &d)) in self.axes.iter().zip(shape).enumerate() {
            if d <= 0 {
                return Err(self.mismatch(shape, format!("axis {i} has non-positive extent {d}")));
            }
            if let Extent::Static(s) = axis.extent {
                if s != d {
                    return Err(self.mismatch(
                        shape,
                        format!("axis {i} is static {s}, got {d}"),
                    ));
                }
            }
        }
        Ok(ProgramInstance {
            program: self,
            shape: shape.to_vec(),
        })
    }

    fn mismatch(&self, shape: &[i64], reason: String) -> TuneError {
        TuneError::ShapeMismatch {
            program: self.name.clone(),
            shape: shape.to_vec(),
            reason,
        }
    }
}

/// Build `out = sum(x, axis=-1)` over an `[spatial, reduce]` f32 input.
/// Pass `-1` for an axis to make it dynamic.
pub fn build_reduce_sum(spatial_size: i64, reduce_size: i64) -> TensorProgram {
    TensorProgram::new(
        format!("reduce_sum_{spatial_size}x{reduce_size}"),
        vec![
            Axis {
                extent: Extent::from_dim(spatial_size),
                tag: AxisTag::Spatial,
            },
            Axis {
                extent: Extent::from_dim(reduce_size),
                tag: AxisTag::Reduce,
            },
        ],
        DType::F32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_reduce_sum_dynamic_axes() {
        let p = build_reduce_sum(32, -1);
        assert_eq!(p.rank(), 2);
        assert_eq!(p.axes[0].extent, Extent::Static(32));
        assert!(p.axes[1].extent.is_dynamic());
        assert_eq!(p.axes[1].tag, AxisTag::Reduce);
    }

    #[test]
    fn test_program_for_bucket() {
        use crate::autotuning::bucket::Dimension;
        let bucket = BucketInfo::new(vec![
            Dimension::uniform(64, 64, AxisTag::Spatial, false).unwrap(),
            Dimension::uniform(32, 63, AxisTag::Reduce, true).unwrap(),
        ])
        .unwrap();
        let p = TensorProgram::reduce_sum_for_bucket(&bucket);
        assert_eq!(p, build_reduce_sum(64, -1));
        assert!(p.instantiate(&[64, 40]).is_ok());
    }

    #[test]
    fn test_instantiate_checks_static_extents() {
        let p = build_reduce_sum(32, -1);
        let inst = p.instantiate(&[32, 700]).unwrap();
        assert_eq!(inst.spatial_size(), 32);
        assert_eq!(inst.reduce_size(), 700);
        assert_eq!(inst.elem_bytes(), 4);

        assert!(matches!(
            p.instantiate(&[64, 700]),
            Err(TuneError::ShapeMismatch { .. })
        ));
        assert!(p.instantiate(&[32]).is_err());
        assert!(p.instantiate(&[32, 0]).is_err());
    }
}
