//! Benchmarks for formation scanning, outcome simulation and grading.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fxgrade::prelude::*;

/// Deterministic oscillating FX series with indicator columns
fn generate_bars(n: usize) -> Vec<Candle> {
  let mut bars = Vec::with_capacity(n);
  let mut price = 1.1000;

  for i in 0..n {
    let t = i as f64;
    let drift = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let target = 1.10 + 0.012 * (t / 9.0).sin() + 0.004 * (t / 47.0).cos();
    let wick = 0.0004 + ((i * 3) % 10) as f64 * 0.0001;

    let open = price;
    let close = target + drift * 0.0005;
    let mut bar = Candle::new(open, open.max(close) + wick, open.min(close) - wick, close)
      .with_atr(0.002)
      .with_volume(1000.0 + ((i * 11) % 700) as f64, Some(1200.0));
    bar.rsi = Some(50.0 + 25.0 * (t / 9.0).cos());
    bars.push(bar);
    price = close;
  }

  bars
}

fn bench_single_pattern(c: &mut Criterion) {
  let bars = generate_bars(1000);

  let engine = EngineBuilder::new()
    .add(BuiltinDetector::PinBar(PinBarDetector::with_defaults()))
    .build()
    .unwrap();

  c.bench_function("scan_pin_bar_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.scan(black_box(&bars), "EUR_USD", &mut SequentialIds::new()));
    })
  });
}

fn bench_all_patterns(c: &mut Criterion) {
  let bars = generate_bars(1000);

  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  c.bench_function("scan_all_patterns_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.scan(black_box(&bars), "EUR_USD", &mut SequentialIds::new()));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [100, 500, 1000, 5000].iter() {
    let bars = generate_bars(*size);

    group.bench_with_input(BenchmarkId::new("scan", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(engine.scan(black_box(&bars), "EUR_USD", &mut SequentialIds::new()));
      })
    });
  }

  group.finish();
}

fn bench_chunked_scan(c: &mut Criterion) {
  let bars = generate_bars(12_000);
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
  let config = ChunkConfig::default();

  c.bench_function("scan_chunked_12000_bars", |b| {
    b.iter(|| {
      let _ = black_box(scan_chunked(
        &engine,
        black_box(&bars),
        "EUR_USD",
        &mut SequentialIds::new(),
        &config,
      ));
    })
  });
}

fn bench_parallel_scan(c: &mut Criterion) {
  let bars1 = generate_bars(1000);
  let bars2 = generate_bars(1000);
  let bars3 = generate_bars(1000);
  let bars4 = generate_bars(1000);

  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  let instruments: Vec<(&str, &[Candle])> =
    vec![("EUR_USD", &bars1[..]), ("GBP_USD", &bars2[..]), ("AUD_USD", &bars3[..]), ("USD_CAD", &bars4[..])];

  c.bench_function("parallel_scan_4_pairs", |b| {
    b.iter(|| {
      let _ = black_box(scan_parallel(black_box(&engine), black_box(instruments.clone())));
    })
  });
}

fn bench_labeling(c: &mut Criterion) {
  let bars = generate_bars(2000);
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
  let candidates = engine.scan(&bars, "EUR_USD", &mut SequentialIds::new()).unwrap();
  let config = OutcomeConfig::default();

  c.bench_function("label_candidates_2000_bars", |b| {
    b.iter(|| {
      let _ = black_box(label_candidates(black_box(&bars), candidates.clone(), &config));
    })
  });
}

criterion_group!(
  benches,
  bench_single_pattern,
  bench_all_patterns,
  bench_scaling,
  bench_chunked_scan,
  bench_parallel_scan,
  bench_labeling,
);

criterion_main!(benches);
