use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use beacon_core::{PrefixMap, ShortCircuit};

#[derive(Debug, Clone)]
enum Route {
    Event(String),
    Ignore,
}

impl ShortCircuit for Route {
    fn short_circuits(&self) -> bool {
        matches!(self, Route::Ignore)
    }
}

/// Typical site config: a handful of exact ignores, some static-asset
/// prefixes/suffixes, then a catch-all.
fn rule_table(extra_prefixes: usize) -> PrefixMap<Route> {
    let mut rules = vec![
        ("/api/ev".to_string(), Route::Ignore),
        ("/favicon.ico".to_string(), Route::Ignore),
        ("/_next*".to_string(), Route::Ignore),
        ("*.svg".to_string(), Route::Ignore),
        ("*.png".to_string(), Route::Ignore),
    ];
    for i in 0..extra_prefixes {
        rules.push((format!("/section-{i}*"), Route::Event(format!("section_{i}"))));
    }
    rules.push(("/*".to_string(), Route::Event("page_view".to_string())));
    PrefixMap::new(rules).expect("valid rules")
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_map_lookup");

    for size in [4usize, 32, 256] {
        let map = rule_table(size);
        let paths = [
            "/favicon.ico",
            "/blog/post-1",
            "/img/logo.svg",
            "/section-3/details",
        ];

        group.bench_with_input(BenchmarkId::from_parameter(size), &map, |b, map| {
            b.iter(|| {
                for path in paths {
                    black_box(map.get(black_box(path)));
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
