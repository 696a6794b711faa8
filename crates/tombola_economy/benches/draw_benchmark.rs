//! Benchmark for draw throughput.
//!
//! Run with: cargo bench --package tombola_economy --bench draw_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tombola_economy::{Catalog, DrawEngine};

const CATALOG: &str = r#"
[[pools]]
id = 1
name = "Standard"
items_per_draw = 5
min_guaranteed_tier = "rare"
jackpot_probability = 0.01
jackpot_min_tier = "epic"
tiers = [
    { rarity = "common", probability = 0.60, display_name = "Common" },
    { rarity = "uncommon", probability = 0.25, display_name = "Uncommon" },
    { rarity = "rare", probability = 0.10, display_name = "Rare" },
    { rarity = "epic", probability = 0.04, display_name = "Epic" },
    { rarity = "legendary", probability = 0.01, display_name = "Legendary" },
]

[[items]]
id = 1
name = "Pebble"
rarity = "common"
pool = 1

[[items]]
id = 2
name = "Twig"
rarity = "common"
pool = 1

[[items]]
id = 10
name = "Feather"
rarity = "uncommon"
pool = 1

[[items]]
id = 20
name = "Lantern"
rarity = "rare"
pool = 1

[[items]]
id = 30
name = "Crown"
rarity = "epic"
pool = 1

[[items]]
id = 40
name = "Comet"
rarity = "legendary"
pool = 1
"#;

fn engine() -> DrawEngine {
    let catalog = Catalog::from_toml_str(CATALOG).expect("benchmark catalog is valid");
    DrawEngine::with_seed(Arc::new(catalog), 42)
}

fn benchmark_single_draw(c: &mut Criterion) {
    let engine = engine();
    c.bench_function("single_draw", |b| b.iter(|| black_box(engine.draw(black_box(1)))));
}

fn benchmark_batch_draws(c: &mut Criterion) {
    let engine = engine();
    let mut group = c.benchmark_group("batch_draws");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("10k_draws", |b| {
        b.iter(|| {
            for _ in 0..10_000 {
                black_box(engine.draw(1).ok());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_single_draw, benchmark_batch_draws);
criterion_main!(benches);
