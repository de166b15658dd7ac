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

//! Both join strategies checked against a nested-loop join on random data.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spilljoin::execution::io::read_all;
use spilljoin::execution::operators::Partitioner;
use spilljoin::{
    ExternalSorter, GraceHashJoin, JoinConfig, JoinError, Relation, RunMergeSorter, SortMergeJoin,
};

/// Writes `rows` rows of `{payload},{key},{name}{i}` so the key sits in the
/// middle of the row.
fn random_relation(dir: &Path, name: &str, rows: usize, key_range: i64, seed: u64) -> Relation {
    let mut rng = StdRng::seed_from_u64(seed);
    let contents: String = (0..rows)
        .map(|i| {
            format!(
                "{},{},{name}{i}\n",
                rng.random_range(0..1_000_000),
                rng.random_range(-key_range..key_range)
            )
        })
        .collect();
    let path = dir.join(format!("{name}.csv"));
    fs::write(&path, contents).unwrap();
    Relation::try_new(name, path, 1).unwrap()
}

fn multiset(path: &Path) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = read_all(path, ',')
        .unwrap()
        .into_iter()
        .map(|r| r.fields().to_vec())
        .collect();
    rows.sort();
    rows
}

fn nested_loop(r: &Relation, s: &Relation) -> Vec<Vec<String>> {
    let r_rows = read_all(r.path(), ',').unwrap();
    let s_rows = read_all(s.path(), ',').unwrap();
    let mut out = Vec::new();
    for left in &r_rows {
        for right in &s_rows {
            if left.key(r.key_index(), r.name()).unwrap() == right.key(s.key_index(), s.name()).unwrap() {
                out.push(left.concat(right).fields().to_vec());
            }
        }
    }
    out.sort();
    out
}

fn config(dir: &Path) -> JoinConfig {
    JoinConfig::default().with_work_dir(dir.join("work"))
}

#[test]
fn grace_hash_join_matches_nested_loop() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 400, 60, 1);
    let s = random_relation(dir.path(), "s", 250, 60, 2);
    let expected = nested_loop(&r, &s);
    assert!(!expected.is_empty());

    for num_buckets in [1, 2, 5, 16, 101] {
        let output = dir.path().join(format!("grace_{num_buckets}.csv"));
        let summary = GraceHashJoin::try_new(
            r.clone(),
            s.clone(),
            &output,
            config(dir.path()).with_num_buckets(num_buckets),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(summary.output_rows as usize, expected.len());
        assert_eq!(multiset(&output), expected, "{num_buckets} buckets");
    }
}

#[test]
fn sort_merge_join_matches_nested_loop_for_any_page_layout() {
    let dir = tempfile::tempdir().unwrap();
    let left = random_relation(dir.path(), "l", 300, 25, 3);
    let right = random_relation(dir.path(), "r", 350, 25, 4);
    let expected = nested_loop(&left, &right);

    for (records_per_page, num_buffers) in [(1, 2), (3, 2), (7, 3), (16, 4), (1000, 10)] {
        let output = dir.path().join(format!("smj_{records_per_page}_{num_buffers}.csv"));
        let summary = SortMergeJoin::try_new(
            left.clone(),
            right.clone(),
            &output,
            config(dir.path()).with_page_layout(records_per_page, num_buffers),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(summary.output_rows as usize, expected.len());
        assert_eq!(
            multiset(&output),
            expected,
            "{records_per_page} rows per page, {num_buffers} buffers"
        );
    }
}

#[test]
fn both_strategies_agree() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 500, 40, 5);
    let s = random_relation(dir.path(), "s", 500, 40, 6);

    let grace_out = dir.path().join("grace.csv");
    let smj_out = dir.path().join("smj.csv");
    GraceHashJoin::try_new(r.clone(), s.clone(), &grace_out, config(dir.path()))
        .unwrap()
        .run()
        .unwrap();
    SortMergeJoin::try_new(r, s, &smj_out, config(dir.path()).with_page_layout(8, 3))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(multiset(&grace_out), multiset(&smj_out));
}

#[test]
fn rerunning_a_join_gives_the_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 200, 30, 7);
    let s = random_relation(dir.path(), "s", 200, 30, 8);
    let output = dir.path().join("out.csv");

    let grace = GraceHashJoin::try_new(r.clone(), s.clone(), &output, config(dir.path())).unwrap();
    grace.run().unwrap();
    let first = multiset(&output);
    grace.run().unwrap();
    assert_eq!(multiset(&output), first);

    let mut smj = SortMergeJoin::try_new(r, s, &output, config(dir.path()).with_page_layout(4, 2)).unwrap();
    smj.run().unwrap();
    assert_eq!(multiset(&output), first);
}

#[test]
fn empty_relation_gives_empty_output_for_both_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 50, 10, 9);
    let empty_path = dir.path().join("empty.csv");
    fs::write(&empty_path, "").unwrap();
    let empty = Relation::try_new("empty", empty_path, 1).unwrap();

    let grace_out = dir.path().join("grace.csv");
    let summary = GraceHashJoin::try_new(empty.clone(), r.clone(), &grace_out, config(dir.path()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.output_rows, 0);
    assert_eq!(fs::read_to_string(&grace_out).unwrap(), "");

    let smj_out = dir.path().join("smj.csv");
    let summary = SortMergeJoin::try_new(r, empty, &smj_out, config(dir.path()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.output_rows, 0);
    assert_eq!(fs::read_to_string(&smj_out).unwrap(), "");
}

#[test]
fn partition_counts_are_consistent_across_relations() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 300, 100, 10);
    let s = random_relation(dir.path(), "s", 300, 100, 11);

    for num_buckets in [1, 3, 8, 64] {
        let partitioner = Partitioner::try_new(num_buckets, dir.path().join("work"), ',').unwrap();
        let r_counts = partitioner.partition(&r, 1).unwrap();
        let s_counts = partitioner.partition(&s, 1).unwrap();
        assert_eq!(r_counts.total_rows(), 300);
        assert_eq!(s_counts.total_rows(), 300);

        let mut bucket_of_key: HashMap<i64, usize> = HashMap::new();
        for counts in [&r_counts, &s_counts] {
            for bucket in 0..num_buckets {
                for record in read_all(counts.path(bucket), ',').unwrap() {
                    let key = record.key(1, counts.relation().name()).unwrap();
                    let previous = bucket_of_key.insert(key, bucket);
                    assert!(previous.is_none() || previous == Some(bucket));
                }
            }
        }
        r_counts.remove_files().unwrap();
        s_counts.remove_files().unwrap();
    }
}

#[test]
fn external_sort_is_an_ordered_permutation() {
    let dir = tempfile::tempdir().unwrap();
    let input = random_relation(dir.path(), "t", 777, 1000, 12);
    let mut expected = multiset(input.path());

    for (records_per_page, num_buffers) in [(1, 2), (5, 3), (50, 10)] {
        let sorted = RunMergeSorter::new(records_per_page, num_buffers, ',')
            .sort(&input, &dir.path().join("work"))
            .unwrap();
        let rows = read_all(sorted.path(), ',').unwrap();
        let keys: Vec<i64> = rows.iter().map(|r| r.key(1, "t").unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let mut actual: Vec<Vec<String>> = rows.into_iter().map(|r| r.fields().to_vec()).collect();
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected);
    }
}

#[test]
fn malformed_key_in_either_strategy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 20, 5, 13);
    let bad_path = dir.path().join("bad.csv");
    fs::write(&bad_path, "1,2,ok\n1,two,bad\n").unwrap();
    let bad = Relation::try_new("bad", bad_path, 1).unwrap();

    let grace = GraceHashJoin::try_new(r.clone(), bad.clone(), dir.path().join("g.csv"), config(dir.path()))
        .unwrap()
        .run();
    assert!(matches!(grace, Err(JoinError::MalformedKey { .. })));

    let smj = SortMergeJoin::try_new(r, bad, dir.path().join("m.csv"), config(dir.path()))
        .unwrap()
        .run();
    assert!(matches!(smj, Err(JoinError::MalformedKey { .. })));
}

#[tokio::test]
async fn concurrent_grace_hash_join_matches_nested_loop() {
    let dir = tempfile::tempdir().unwrap();
    let r = random_relation(dir.path(), "r", 600, 80, 14);
    let s = random_relation(dir.path(), "s", 400, 80, 15);
    let expected = nested_loop(&r, &s);

    for workers in [1, 2, 8] {
        let output = dir.path().join(format!("concurrent_{workers}.csv"));
        let summary = GraceHashJoin::try_new(
            r.clone(),
            s.clone(),
            &output,
            config(dir.path())
                .with_num_buckets(13)
                .with_max_concurrent_buckets(workers),
        )
        .unwrap()
        .run_concurrent()
        .await
        .unwrap();
        assert_eq!(summary.output_rows as usize, expected.len());
        assert_eq!(multiset(&output), expected, "{workers} workers");
    }
}
