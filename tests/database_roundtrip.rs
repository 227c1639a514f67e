use std::path::PathBuf;
use std::sync::Arc;

use tile_tuner::autotuning::{
    AxisTag, BucketSweep, ConfigSource, FileTileConfigDatabase, Lookup, ScheduleConfigManager,
    SimulatedMeasurer, TileConfigDatabase, TileTuner, TuneLevel,
};
use tile_tuner::{BucketInfo, Dimension, Target, TensorProgram, TunerConfig};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tile_tuner_it_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn tuner_at(dir: &PathBuf, target: &Target) -> TileTuner {
    let config = TunerConfig {
        config_dir: dir.clone(),
        level: TuneLevel::Fast,
        ..TunerConfig::default()
    };
    TileTuner::with_file_database(target.clone(), Arc::new(SimulatedMeasurer::new()), config)
}

#[test]
fn stored_configs_reload_unchanged() {
    let dir = scratch_dir("reload");
    let target = Target::nvidia_a100();
    let sweep = BucketSweep::spatial_reduce((32, 32), false, (32, 511), true).unwrap();

    let reports = tuner_at(&dir, &target)
        .tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)
        .unwrap();
    assert!(!reports.is_empty());

    let db = FileTileConfigDatabase::new(&dir);
    let buckets = sweep.buckets().unwrap();
    let map = db.get_configs(&target, &buckets[0].iter_space_type());
    assert_eq!(map.len(), buckets.len());
    for report in &reports {
        match map.lookup(&report.bucket) {
            Lookup::Exact(rec) => {
                assert_eq!(rec.config, report.config);
                assert_eq!(rec.score, report.score);
            }
            other => panic!("expected exact record for {}, got {other:?}", report.bucket),
        }
    }

    // A second tuner finds every bucket already stored.
    let again = tuner_at(&dir, &target)
        .tune_sweep(&sweep, TensorProgram::reduce_sum_for_bucket)
        .unwrap();
    assert!(again.iter().all(|r| r.from_database));
    let configs: Vec<_> = again.iter().map(|r| r.config).collect();
    let expected: Vec<_> = reports.iter().map(|r| r.config).collect();
    assert_eq!(configs, expected);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn targets_do_not_share_records() {
    let dir = scratch_dir("targets");
    let a100 = Target::nvidia_a100();
    let bucket = BucketInfo::new(vec![
        Dimension::uniform(32, 32, AxisTag::Spatial, false).unwrap(),
        Dimension::uniform(128, 255, AxisTag::Reduce, true).unwrap(),
    ])
    .unwrap();

    let mut tuner = tuner_at(&dir, &a100);
    tuner
        .tune_bucket(&TensorProgram::reduce_sum_for_bucket(&bucket), &bucket)
        .unwrap();
    tuner.commit().unwrap();

    let db = FileTileConfigDatabase::new(&dir);
    assert_eq!(db.get_configs(&a100, &bucket.iter_space_type()).len(), 1);
    assert!(db
        .get_configs(&Target::amd_mi250(), &bucket.iter_space_type())
        .is_empty());

    let mut manager = ScheduleConfigManager::new(Target::amd_mi250());
    manager.set_policy("database").unwrap();
    assert_eq!(manager.load_from(&db, &bucket.iter_space_type()), 0);
    assert_eq!(manager.get_config(&bucket).source, ConfigSource::Heuristic);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_partition_falls_back_to_heuristic() {
    let dir = scratch_dir("corrupt");
    let target = Target::nvidia_a100();
    let bucket = BucketInfo::new(vec![
        Dimension::uniform(32, 32, AxisTag::Spatial, false).unwrap(),
        Dimension::uniform(32, 63, AxisTag::Reduce, true).unwrap(),
    ])
    .unwrap();
    let db = FileTileConfigDatabase::new(&dir);
    let path = db.partition_path(&target.fingerprint(), &bucket.iter_space_type());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "[1, 2,").unwrap();

    let mut manager = ScheduleConfigManager::new(target);
    manager.set_policy("database").unwrap();
    assert_eq!(manager.load_from(&db, &bucket.iter_space_type()), 0);
    assert_eq!(manager.get_config(&bucket).source, ConfigSource::Heuristic);

    let _ = std::fs::remove_dir_all(&dir);
}
