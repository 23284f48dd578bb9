use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perfshift::changepoint::{remove_duplicate_tests, ChangePoint, ChangePointSet, ChangePointType};
use perfshift::series::{ExecutionSeries, SeriesBuilder};
use std::sync::Arc;

fn build_series(tests: usize, revisions: usize) -> Vec<Arc<ExecutionSeries>> {
    (0..tests)
        .map(|t| {
            let builder = (0..revisions).fold(SeriesBuilder::new("bench", format!("t{t}")), |b, r| {
                // every tenth revision steps up by a test-dependent amount
                let level = 10.0 + ((r / 10) * (t % 7 + 1)) as f64;
                b.revision(&format!("r{r}"), &[level, level * 1.01, level * 0.99])
            });
            Arc::new(builder.build())
        })
        .collect()
}

fn detections(series: &[Arc<ExecutionSeries>]) -> Vec<ChangePoint> {
    series
        .iter()
        .flat_map(|s| {
            s.revisions()
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 10 == 9 && i + 1 < s.len())
                .filter_map(|(_, rev)| ChangePoint::detect(rev, Arc::clone(s)).ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn benchmark_set_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("changepoint_set_add");

    for tests in [10, 100, 1000].iter() {
        let points = detections(&build_series(*tests, 50));
        group.throughput(Throughput::Elements(points.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(format!("tests{tests}")), &points, |b, points| {
            b.iter(|| {
                let set = ChangePointSet::new();
                for cp in points {
                    set.add(std::hint::black_box(cp.clone())).unwrap();
                }
                set
            });
        });
    }

    group.finish();
}

fn benchmark_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("changepoint_classify");

    for samples in [1, 10, 100].iter() {
        let values: Vec<f64> = (0..*samples).map(|i| 10.0 + i as f64 * 0.01).collect();
        let doubled: Vec<f64> = values.iter().map(|v| v * 2.0).collect();
        let series = Arc::new(
            SeriesBuilder::new("bench", "classify")
                .revision("r0", &values)
                .revision("r1", &doubled)
                .build(),
        );

        group.bench_with_input(BenchmarkId::from_parameter(format!("samples{samples}")), &series, |b, series| {
            b.iter(|| ChangePoint::detect(std::hint::black_box("r0"), Arc::clone(series)).unwrap());
        });
    }

    group.bench_function("from_means", |b| {
        b.iter(|| ChangePointType::from_means(std::hint::black_box(10.0), std::hint::black_box(17.5)));
    });

    group.finish();
}

fn benchmark_remove_duplicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("changepoint_remove_duplicates");

    for sets in [2, 4, 8].iter() {
        let series = build_series(200, 50);
        let inputs: Vec<ChangePointSet> = (0..*sets)
            .map(|_| {
                let set = ChangePointSet::new();
                for cp in detections(&series) {
                    set.add(cp).unwrap();
                }
                set
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(format!("sets{sets}")), &inputs, |b, inputs| {
            b.iter(|| remove_duplicate_tests(std::hint::black_box(inputs)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_set_add,
    benchmark_classify,
    benchmark_remove_duplicates
);
criterion_main!(benches);
