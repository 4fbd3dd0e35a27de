use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zdrift::{fit, BedType, FitConfig, FitMode, Observation};

/// Synthetic print history: drift driven by bed delta and temperatures with
/// mild capture noise, plus a sprinkling of wild captures.
fn make_history(n: usize, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let bed_probed_delta = rng.gen_range(-0.08f64..0.08);
            let nozzle_temperature = rng.gen_range(190.0f64..260.0);
            let bed_temperature = rng.gen_range(45.0f64..95.0);
            let bed = BedType::ALL[i % BedType::ALL.len()];
            let mut z_offset = 0.6 * bed_probed_delta - 0.0004 * bed_temperature
                + 0.0001 * nozzle_temperature
                + rng.gen_range(-0.005..0.005);
            if i % 23 == 0 {
                z_offset += rng.gen_range(0.5..1.0);
            }
            Observation {
                nozzle_reference_z: -0.09,
                nozzle_temperature,
                bed_temperature,
                sensor_temperature: rng.gen_range(20.0f64..45.0),
                bed_surface_type: bed.key().to_string(),
                bed_probed_delta,
                z_offset: Some(z_offset),
                timestamp: i as f64,
            }
        })
        .collect()
}

fn bench_fit_linear(c: &mut Criterion) {
    let config = FitConfig::default();
    let history_50 = make_history(50, 5);
    let history_200 = make_history(200, 6);

    c.bench_function("fit_linear_50", |b| {
        b.iter(|| {
            let model = fit(black_box(&history_50), FitMode::Linear, black_box(&config))
                .expect("deterministic fixture should always fit");
            black_box(model.stats.r_squared)
        })
    });

    c.bench_function("fit_linear_200", |b| {
        b.iter(|| {
            let model = fit(black_box(&history_200), FitMode::Linear, black_box(&config))
                .expect("deterministic fixture should always fit");
            black_box(model.stats.r_squared)
        })
    });
}

fn bench_fit_polynomial(c: &mut Criterion) {
    let config = FitConfig::default();
    let history_200 = make_history(200, 7);

    c.bench_function("fit_polynomial_200", |b| {
        b.iter(|| {
            let model = fit(
                black_box(&history_200),
                FitMode::Polynomial,
                black_box(&config),
            )
            .expect("deterministic fixture should always fit");
            black_box(model.stats.r_squared)
        })
    });
}

criterion_group!(fit_benches, bench_fit_linear, bench_fit_polynomial);
criterion_main!(fit_benches);
