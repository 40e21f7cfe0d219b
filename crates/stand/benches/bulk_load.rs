use bulk_loader::application::ports::{Sorter, SstGenerator};
use bulk_loader::infrastructure::generator::RocksSstGenerator;
use bulk_loader::infrastructure::sorter::{ExternalSorter, SortSettings};
use logload_stand::Fixture;

use std::time::Duration;

const BENCH_GROUP_NAME: &str = "bench.bulk_load";

const SPLITS: usize = 4;
const LINES_PER_SPLIT: usize = 25_000;

fn settings(spill_threshold_cells: usize) -> SortSettings {
    SortSettings {
        num_threads: SPLITS,
        spill_threshold_cells,
        merge_fan_in: 16,
        batch_size: 8_192,
    }
}

fn sort_bench_group(c: &mut criterion::Criterion, fixture: &Fixture) {
    let mut group = c.benchmark_group(BENCH_GROUP_NAME);
    group.throughput(criterion::Throughput::Elements(fixture.lines as u64));
    for spill_threshold_cells in [50_000, 250_000, 4_000_000] {
        let sorter = ExternalSorter::with_settings(
            &fixture.input(),
            fixture.schema.clone(),
            settings(spill_threshold_cells),
        );
        let bench_id = criterion::BenchmarkId::new("sort", spill_threshold_cells);
        group.bench_function(bench_id, |b| {
            b.iter_batched(
                || fixture.context().unwrap(),
                |context| sorter.run(&context).unwrap(),
                criterion::BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

fn generate_bench_group(c: &mut criterion::Criterion, fixture: &Fixture) {
    let mut group = c.benchmark_group(BENCH_GROUP_NAME);
    group.throughput(criterion::Throughput::Elements(fixture.lines as u64));
    let sorter =
        ExternalSorter::with_settings(&fixture.input(), fixture.schema.clone(), settings(4_000_000));
    let generator = RocksSstGenerator::with_settings(fixture.schema.column_group(), SPLITS, 8_192);
    group.bench_function("sort_and_generate", |b| {
        b.iter_batched(
            || fixture.context().unwrap(),
            |context| {
                let sorted = sorter.run(&context).unwrap();
                generator.run(&context, &sorted.runs).unwrap()
            },
            criterion::BatchSize::PerIteration,
        );
    });
    group.finish();
}

fn bulk_load_benchmark(c: &mut criterion::Criterion) {
    let fixture = Fixture::new(SPLITS, LINES_PER_SPLIT).unwrap();
    sort_bench_group(c, &fixture);
    generate_bench_group(c, &fixture);
}

criterion::criterion_group! {
    name = bulk_load;
    config = criterion::Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_secs(5))
        .measurement_time(Duration::from_secs(60));
    targets = bulk_load_benchmark,
}

criterion::criterion_main!(bulk_load);
