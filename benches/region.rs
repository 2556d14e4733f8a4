// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Region operations sit on the damage path of every commit and on the
//! coverage test of every repaint; keep them cheap.

use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use wlkit::geometry::Geometry;
use wlkit::region::Region;

fn rects(n: u32) -> Vec<Geometry> {
    (0..n)
        .map(|i| {
            let x = (i * 37) % 1920;
            let y = (i * 91) % 1080;
            Geometry::new(x as i32, y as i32, 64 + (i % 128), 64 + (i % 64))
        })
        .collect()
}

fn bench_union(c: &mut Criterion) {
    let input = rects(64);
    c.bench_function("region_union_64", |b| {
        b.iter(|| {
            let mut region = Region::new();
            for r in &input {
                region.add(*r);
            }
            std::hint::black_box(region.extents())
        })
    });
}

fn bench_covers(c: &mut Criterion) {
    let mut region = Region::new();
    for r in rects(32) {
        region.add(r);
    }
    let root = Geometry::new(0, 0, 1920, 1080);
    c.bench_function("region_covers_output", |b| {
        b.iter(|| std::hint::black_box(region.covers(root)))
    });
}

criterion_group!(benches, bench_union, bench_covers);
criterion_main!(benches);
