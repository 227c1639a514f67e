use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;
use tile_tuner::autotuning::kernel::tiled_reduce_sum;
use tile_tuner::autotuning::{
    AxisTag, CandidateSpace, ObjectiveConfig, ScheduleConfigSearcher, SearchConfig,
    SimulatedMeasurer, WeightedSamplingTrailObjectiveFunc,
};
use tile_tuner::{BucketInfo, Dimension, Target, TensorProgram};

fn reduce_bucket(spatial: i64, lo: i64, hi: i64) -> BucketInfo {
    BucketInfo::new(vec![
        Dimension::uniform(spatial, spatial, AxisTag::Spatial, false).unwrap(),
        Dimension::uniform(lo, hi, AxisTag::Reduce, true).unwrap(),
    ])
    .unwrap()
}

fn searcher(target: &Target, bucket: &BucketInfo, config: SearchConfig) -> ScheduleConfigSearcher {
    let objective = WeightedSamplingTrailObjectiveFunc::new(
        TensorProgram::reduce_sum_for_bucket(bucket),
        bucket,
        target.clone(),
        Arc::new(SimulatedMeasurer::new()),
        &ObjectiveConfig::default(),
    )
    .unwrap();
    let space = CandidateSpace::for_reduce(target, bucket).unwrap();
    ScheduleConfigSearcher::new(Box::new(objective), space, config)
}

fn benchmark_candidate_space(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_space");
    let target = Target::nvidia_a100();

    for &(spatial, lo, hi) in &[(32i64, 32i64, 63i64), (4096, 512, 1023), (1, 1024, 2047)] {
        let bucket = reduce_bucket(spatial, lo, hi);
        let space = CandidateSpace::for_reduce(&target, &bucket).unwrap();
        group.bench_function(&format!("legal_{spatial}x{lo}_{hi}"), |b| {
            b.iter(|| black_box(space.legal_candidates()))
        });
    }

    group.finish();
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_search");
    group.sample_size(20);
    let target = Target::nvidia_a100();
    let bucket = reduce_bucket(32, 256, 511);

    let configs = [
        ("grid", SearchConfig::thorough()),
        ("guided", SearchConfig::default()),
        ("fast", SearchConfig::fast()),
        ("grid_sequential", SearchConfig { parallel: false, ..SearchConfig::thorough() }),
    ];
    for (name, config) in configs {
        let s = searcher(&target, &bucket, config);
        group.bench_function(name, |b| b.iter(|| black_box(s.search().unwrap())));
    }

    group.finish();
}

fn benchmark_host_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiled_reduce_sum");
    let mut rng = rand::thread_rng();
    let (rows, cols) = (1024usize, 1024usize);
    let input: Vec<f32> = (0..rows * cols).map(|_| rng.gen()).collect();
    let mut out = vec![0.0f32; rows];
    group.throughput(Throughput::Bytes((rows * cols * 4) as u64));

    for &(rows_per_task, lanes) in &[(1usize, 32usize), (4, 32), (16, 128), (64, 1024)] {
        group.bench_function(&format!("rows{rows_per_task}_lanes{lanes}"), |b| {
            b.iter(|| {
                tiled_reduce_sum(
                    black_box(&input),
                    black_box(cols),
                    black_box(rows_per_task),
                    black_box(lanes),
                    black_box(&mut out),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_candidate_space, benchmark_search, benchmark_host_kernel);
criterion_main!(benches);
