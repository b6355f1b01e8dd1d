//! # Calibration Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use drive_lib::calib::{CalibParams, CalibrationConverter};

fn calib_benchmark(c: &mut Criterion) {
    let converter = CalibrationConverter::new(CalibParams::default()).unwrap();

    c.bench_function("forward sweep", |b| b.iter(|| {
        let mut total = 0.0;
        for ds in 0..=255u8 {
            total += converter.forward(black_box(ds as f64));
        }
        total
    }));

    c.bench_function("drive strength for speed", |b| b.iter(|| {
        converter.drive_strength_for_speed(black_box(0.34))
    }));
}

criterion_group!(benches, calib_benchmark);
criterion_main!(benches);
