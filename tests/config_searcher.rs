//! End-to-end tuning over the reduce-sum bucket sweep.

use std::sync::Arc;

use tile_tuner::autotuning::{
    get_tile_size_config, heuristic_tile_config, AxisTag, BucketSweep, CandidateSpace,
    NaiveTileConfigDatabase, ObjectiveConfig, ObjectiveFunc, ScheduleConfigManager,
    SimulatedMeasurer, TileConfigDatabase, TileTuner, TuneLevel, WeightedSamplingTrailObjectiveFunc,
};
use tile_tuner::{BucketInfo, Dimension, Target, TensorProgram, TuneError, TunerConfig};

fn thorough_tuner(target: &Target) -> TileTuner {
    let config = TunerConfig {
        level: TuneLevel::Thorough,
        ..TunerConfig::default()
    };
    TileTuner::new(
        target.clone(),
        Box::new(NaiveTileConfigDatabase::new()),
        Arc::new(SimulatedMeasurer::new()),
        config,
    )
}

#[test]
fn test_reduce_sweep_scores_beat_every_candidate() {
    let target = Target::nvidia_a100();
    let mut tuner = thorough_tuner(&target);
    let sweep = BucketSweep::spatial_reduce((32, 32), false, (32, 1024), true).unwrap();
    let buckets = sweep.buckets().unwrap();
    let reports = tuner
        .tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)
        .unwrap();
    assert_eq!(reports.len(), buckets.len());

    let objective_cfg = ObjectiveConfig::default();
    for (bucket, report) in buckets.iter().zip(&reports) {
        let reduce = &bucket.space[1];
        let width = reduce.upper - reduce.lower + 1;
        assert!([32, 128, 256, 512, 1024].contains(&width));
        assert_eq!(width, get_tile_size_config(reduce.lower));
        assert_eq!(bucket.space[0].effective_width(), 1);
        assert_eq!(report.bucket, bucket.key());

        // Same seed and sample count, so the same sampled shapes.
        let objective = WeightedSamplingTrailObjectiveFunc::new(
            TensorProgram::reduce_sum_for_bucket(bucket),
            bucket,
            target.clone(),
            Arc::new(SimulatedMeasurer::new()),
            &objective_cfg,
        )
        .unwrap();
        let space = CandidateSpace::for_reduce(&target, bucket).unwrap();
        assert!(space.is_legal(&report.config));
        for candidate in space.legal_candidates() {
            let alone = objective.evaluate(&candidate);
            assert!(
                report.score <= alone.score,
                "{}: tuned {} > {} for {}",
                bucket.key(),
                report.score,
                alone.score,
                candidate
            );
        }
        let heuristic = objective.evaluate(&heuristic_tile_config(&target, bucket));
        assert!(report.score <= heuristic.score);
    }
}

#[test]
fn test_sweep_records_feed_config_manager() {
    let target = Target::nvidia_a100();
    let mut db = NaiveTileConfigDatabase::new();
    let sweep = BucketSweep::spatial_reduce((32, 32), false, (32, 255), true).unwrap();

    let reports = {
        let mut tuner = TileTuner::new(
            target.clone(),
            Box::new(NaiveTileConfigDatabase::new()),
            Arc::new(SimulatedMeasurer::new()),
            TunerConfig {
                level: TuneLevel::Fast,
                ..TunerConfig::default()
            },
        );
        tuner
            .tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)
            .unwrap()
    };
    let buckets = sweep.buckets().unwrap();
    for (bucket, report) in buckets.iter().zip(&reports) {
        db.add_config(&target, bucket, report.config, report.score);
    }

    let mut manager = ScheduleConfigManager::new(target);
    manager.set_policy("database").unwrap();
    manager.load_from(&db, &buckets[0].iter_space_type());

    for (bucket, report) in buckets.iter().zip(&reports) {
        let resolved = manager.get_config(bucket);
        assert_eq!(resolved.config, report.config);
        assert_eq!(resolved.score, Some(report.score));
    }
}

#[test]
fn test_static_spatial_sweep_uses_unit_buckets() {
    let target = Target::nvidia_a100();
    let mut tuner = thorough_tuner(&target);
    let sweep = BucketSweep::spatial_reduce((1, 200), false, (64, 64), false).unwrap();
    let reports = tuner
        .tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)
        .unwrap();
    // Lowers 1, 33, 65, 97, 129: the step stays 32 below 128, then 128.
    let lowers: Vec<i64> = reports.iter().map(|r| r.bucket.0[0].lower).collect();
    assert_eq!(lowers, vec![1, 33, 65, 97, 129]);
    for r in &reports {
        assert_eq!(r.bucket.0[0].lower, r.bucket.0[0].upper);
        assert_eq!(r.bucket.volume(), 1);
    }
}

#[test]
fn test_invalid_dimension_is_rejected() {
    let err = Dimension::uniform(100, 50, AxisTag::Reduce, true).unwrap_err();
    assert!(matches!(err, TuneError::InvalidDimension { .. }));

    let err = BucketInfo::new(vec![Dimension {
        lower: 100,
        upper: 50,
        tag: AxisTag::Reduce,
        is_dynamic: false,
        weights: vec![1.0],
    }])
    .unwrap_err();
    assert!(matches!(err, TuneError::InvalidDimension { index: 0, .. }));
}
