//! Benchmark for the pack-open hot path.
//!
//! TARGET: 50,000 validations per second with a full score history
//!
//! Run with: cargo bench --package daddeck_security --bench validation_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daddeck_core::{GenerationConfig, Item, Pack, Rarity, Severity, SlotRule};
use daddeck_security::{
    AuditAction, AuditConfig, AuditLogger, PackValidator, RateLimiter, ValidateOptions,
    ValidatorConfig,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn draw(rng: &mut ChaCha8Rng, rule: &SlotRule) -> Rarity {
    match rule {
        SlotRule::Guaranteed { rarity } => *rarity,
        SlotRule::Pool { entries } => {
            let total: u32 = entries.iter().map(|e| e.weight).sum();
            let mut roll = rng.gen_range(0..total);
            for entry in entries {
                if roll < entry.weight {
                    return entry.rarity;
                }
                roll -= entry.weight;
            }
            entries[entries.len() - 1].rarity
        }
    }
}

fn create_packs(config: &GenerationConfig, count: usize) -> Vec<Pack> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..count)
        .map(|n| {
            let items = config
                .slots
                .iter()
                .enumerate()
                .map(|(slot, rule)| {
                    let rarity = draw(&mut rng, rule);
                    Item::new(format!("{rarity}-{n}-{slot}"), rarity)
                })
                .collect();
            Pack::new(format!("bench-{n}"), items, chrono::Utc::now(), &config.id)
        })
        .collect()
}

fn benchmark_single_validation(c: &mut Criterion) {
    let config = GenerationConfig::standard();
    let packs = create_packs(&config, 100_000);
    let validator = PackValidator::new(ValidatorConfig {
        cache_capacity: 200_000,
        ..ValidatorConfig::default()
    });

    c.bench_function("single_pack_validation", |b| {
        let mut i = 0usize;
        b.iter(|| {
            // Past the end every pack is a replay; that path is measured too.
            let pack = &packs[i % packs.len()];
            i += 1;
            black_box(validator.validate(black_box(pack), &config, &ValidateOptions::new()))
        });
    });
}

fn benchmark_validation_with_history(c: &mut Criterion) {
    let config = GenerationConfig::standard();
    let packs = create_packs(&config, 10_000);
    let validator = PackValidator::default();
    let history: Vec<f64> = packs
        .iter()
        .map(|p| validator.validate(p, &config, &ValidateOptions::new()).score)
        .collect();
    validator.clear_cache();

    let mut group = c.benchmark_group("validation_with_history");
    group.throughput(Throughput::Elements(packs.len() as u64));
    group.sample_size(10);

    group.bench_function("10K_packs_10K_history", |b| {
        b.iter(|| {
            validator.clear_cache();
            for pack in &packs {
                black_box(validator.validate(
                    pack,
                    &config,
                    &ValidateOptions::new().history(&history),
                ));
            }
        });
    });

    group.finish();
}

fn benchmark_rate_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::default();
    let identifiers: Vec<String> = (0..1_000).map(|i| format!("device-{i}")).collect();

    c.bench_function("rate_limit_record", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(limiter.record("api_request", &identifiers[i % identifiers.len()]))
        });
    });
}

fn benchmark_audit_log(c: &mut Criterion) {
    let audit = AuditLogger::new(AuditConfig {
        persist: false,
        ..AuditConfig::default()
    });
    let sink = audit.sink();

    let mut group = c.benchmark_group("audit");
    group.bench_function("log_sync", |b| {
        b.iter(|| {
            audit.log(
                AuditAction::PackFlagged,
                serde_json::json!({ "score": 12.5 }),
                Severity::Low,
                black_box("device-1"),
            );
        });
    });
    group.bench_function("sink_submit", |b| {
        b.iter(|| {
            sink.submit(
                AuditAction::PackFlagged,
                serde_json::json!({ "score": 12.5 }),
                Severity::Low,
                black_box("device-1"),
            );
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_validation,
    benchmark_validation_with_history,
    benchmark_rate_limiter,
    benchmark_audit_log,
);
criterion_main!(benches);
