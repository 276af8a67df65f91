//! Run with: `cargo bench --bench windowing`

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use air_quality_prep::observations::{Observation, ObservationTable};
use air_quality_prep::smoothing::{smooth, SmoothingMethod};
use air_quality_prep::split::{generate_windows_and_splits, ChunkLayout, SplitPolicy};
use air_quality_prep::time_series::{build_time_series, TimeSeriesMatrix};

/// `weeks` of hourly readings for `stations` sensors, with every tenth reading missing.
fn synthetic_matrix(stations: usize, weeks: usize) -> TimeSeriesMatrix {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    let hours = weeks * 168;
    let mut rows = Vec::with_capacity(stations * hours);
    for s in 0..stations {
        for h in 0..hours {
            if (h + s) % 10 == 0 {
                continue;
            }
            let value = 8.0 + ((h % 24) as f64 / 3.0).sin() * 4.0 + s as f64 * 0.1;
            rows.push(Observation::new(
                format!("{}", 1000 + s),
                start + Duration::hours(h as i64),
                value,
            ));
        }
    }
    build_time_series(&ObservationTable::load(rows)).unwrap()
}

fn bench_build(c: &mut Criterion) {
    let matrix = synthetic_matrix(32, 4);
    let start = matrix.grid().start();
    let rows: Vec<Observation> = matrix
        .stations()
        .iter()
        .enumerate()
        .flat_map(|(col, station)| {
            matrix
                .values()
                .column(col)
                .iter()
                .enumerate()
                .filter_map(|(row, v)| {
                    v.map(|value| {
                        Observation::new(station.clone(), start + Duration::hours(row as i64), value)
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    c.bench_function("build_time_series_32x672", |b| {
        b.iter_batched(
            || ObservationTable::load(rows.clone()),
            |table| build_time_series(black_box(&table)).unwrap(),
            BatchSize::LargeInput,
        )
    });
}

fn bench_smoothing(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoothing");
    for stations in [16, 64] {
        let matrix = synthetic_matrix(stations, 8);
        group.bench_with_input(BenchmarkId::new("mean_24", stations), &matrix, |b, m| {
            b.iter(|| smooth(black_box(m), 24, SmoothingMethod::Mean).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("median_24", stations), &matrix, |b, m| {
            b.iter(|| smooth(black_box(m), 24, SmoothingMethod::Median).unwrap())
        });
    }
    group.finish();
}

fn bench_splits(c: &mut Criterion) {
    let matrix = synthetic_matrix(32, 12);
    let mut group = c.benchmark_group("windows_and_splits");

    let proportional = SplitPolicy::Proportional {
        train_fraction: 0.7,
        test_fraction: 0.2,
    };
    group.bench_function("proportional_6_6", |b| {
        b.iter(|| generate_windows_and_splits(black_box(&matrix), 6, 6, &proportional).unwrap())
    });

    let chunked = SplitPolicy::Chunked(ChunkLayout::from_weeks(4, 3, 0.875, 1).unwrap());
    group.bench_function("chunked_6_6", |b| {
        b.iter(|| generate_windows_and_splits(black_box(&matrix), 6, 6, &chunked).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_smoothing, bench_splits);
criterion_main!(benches);
