//! Static reduce tile configuration used when no tuned record applies.

use crate::autotuning::bucket::{AxisTag, BucketInfo};
use crate::autotuning::search_space::TileConfig;
use crate::target::Target;

/// Heuristic config for a reduce with the given upper extents.
///
/// The tree covers the whole reduce row up to one block. Short rows pack
/// several rows per warp, and large spatial extents get wider blocks so each
/// block amortises its launch.
pub fn heuristic_from_extents(target: &Target, spatial: i64, reduce: i64) -> TileConfig {
    let warp = target.threads_per_warp.max(1);
    let max_warps = target.max_warps_per_block().max(1);
    let spatial = spatial.max(1) as usize;
    let reduce = reduce.max(1) as usize;

    let tree = reduce
        .next_power_of_two()
        .min(target.max_threads_per_block)
        .max(1);

    let min_warps = if spatial >= 1024 { 8 } else { 1 };
    let warp_num = (tree / warp).max(min_warps).min(max_warps);

    let spatial_inner_num = if reduce <= 64 && spatial >= 4096 { 4 } else { 1 };

    TileConfig::new(warp_num, tree, spatial_inner_num)
}

/// Heuristic config for a bucket, sized for its largest shape.
pub fn heuristic_tile_config(target: &Target, bucket: &BucketInfo) -> TileConfig {
    heuristic_from_extents(
        target,
        bucket.upper_extent(AxisTag::Spatial),
        bucket.upper_extent(AxisTag::Reduce),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autotuning::bucket::Dimension;
    use crate::autotuning::search_space::CandidateSpace;

    #[test]
    fn test_heuristic_is_legal() {
        for target in [Target::nvidia_a100(), Target::amd_mi250()] {
            for &(s, r_lo, r_hi) in &[
                (1, 1, 1),
                (32, 32, 63),
                (8192, 32, 63),
                (4, 2048, 3071),
                (2048, 700, 767),
            ] {
                let bucket = BucketInfo::new(vec![
                    Dimension::uniform(s, s, AxisTag::Spatial, false).unwrap(),
                    Dimension::uniform(r_lo, r_hi, AxisTag::Reduce, true).unwrap(),
                ])
                .unwrap();
                let cfg = heuristic_tile_config(&target, &bucket);
                let space = CandidateSpace::for_reduce(&target, &bucket).unwrap();
                assert!(
                    space.is_legal(&cfg),
                    "{cfg} illegal for {} on {}",
                    bucket.key(),
                    target.arch
                );
            }
        }
    }

    #[test]
    fn test_heuristic_tracks_reduce_extent() {
        let t = Target::nvidia_a100();
        assert_eq!(heuristic_from_extents(&t, 32, 100), TileConfig::new(4, 128, 1));
        assert_eq!(heuristic_from_extents(&t, 32, 5000), TileConfig::new(32, 1024, 1));
        assert_eq!(heuristic_from_extents(&t, 8192, 16), TileConfig::new(8, 16, 4));
    }
}
