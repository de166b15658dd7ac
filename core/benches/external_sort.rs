// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

#[path = "common.rs"]
mod common;

use common::*;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use spilljoin::{ExternalSorter, RunMergeSorter};

const NUM_ROWS: usize = 1024 * 32;

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort");
    let dir = tempfile::tempdir().unwrap();
    let input = create_relation(dir.path(), "t", NUM_ROWS, NUM_ROWS as i64);
    let work_dir = dir.path().join("work");

    for (records_per_page, num_buffers) in [(128, 4), (128, 16), (4096, 8)] {
        let sorter = RunMergeSorter::new(records_per_page, num_buffers, ',');
        group.bench_function(
            BenchmarkId::new(
                "run_merge_sort",
                format!("{records_per_page}x{num_buffers}"),
            ),
            |b| {
                b.iter(|| sorter.sort(&input, &work_dir).unwrap());
            },
        );
    }
}

fn config() -> Criterion {
    Criterion::default().sample_size(10)
}

criterion_group! {
    name = benches;
    config = config();
    targets = criterion_benchmark
}
criterion_main!(benches);
