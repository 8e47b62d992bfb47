//! Benchmark suite for search operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use degrees::search::{Node, SearchFrontier};
use degrees::storage::{EntityKind, EntityRecord};
use degrees::{GraphCache, SledGraphCache};
use tempfile::TempDir;

/// Grid of `width` x `width` users, each linked to its right and lower neighbor
fn create_user_grid(width: u64) -> (TempDir, SledGraphCache) {
    let dir = TempDir::new().unwrap();
    let cache = SledGraphCache::open(dir.path().join("bench")).unwrap();

    let user = |row: u64, col: u64| EntityRecord::provisional(EntityKind::User, (row * width + col).to_string());
    for row in 0..width {
        for col in 0..width {
            if col + 1 < width {
                cache.upsert_edge(&user(row, col), &user(row, col + 1), None).unwrap();
            }
            if row + 1 < width {
                cache.upsert_edge(&user(row, col), &user(row + 1, col), None).unwrap();
            }
        }
    }

    (dir, cache)
}

fn bench_frontier_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("frontier_sort");

    for size in [100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut frontier = SearchFrontier::new(Node::new(0usize, 0));
                for i in 1..size {
                    frontier.push(Node::new(i, i % 6));
                }
                frontier.sort_by_heuristic(6);
                black_box(frontier.len());
            });
        });
    }

    group.finish();
}

fn bench_shortest_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_paths");

    for width in [4u64, 8] {
        let (_dir, cache) = create_user_grid(width);
        let start = EntityRecord::new(EntityKind::User, "0").id;
        let end = EntityRecord::new(EntityKind::User, (width * width - 1).to_string()).id;
        let max_length = (2 * (width - 1)) as usize;

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let paths = cache.shortest_paths(EntityKind::User, start, end, max_length).unwrap();
                black_box(paths.len());
            });
        });
    }

    group.finish();
}

fn bench_path_exists(c: &mut Criterion) {
    let (_dir, cache) = create_user_grid(8);
    let start = EntityRecord::new(EntityKind::User, "0").id;
    let end = EntityRecord::new(EntityKind::User, "63").id;

    c.bench_function("path_exists_grid_8", |b| {
        b.iter(|| black_box(cache.path_exists(EntityKind::User, start, end, 14).unwrap()));
    });
}

criterion_group!(benches, bench_frontier_sort, bench_shortest_paths, bench_path_exists);
criterion_main!(benches);
