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

//! Hash partitioning of a relation into bucket files.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use log::{debug, info};

use crate::errors::{JoinError, JoinResult};
use crate::execution::io::{create_for_write, DelimitedReader, FANOUT_BUFFER_SIZE, IO_BUFFER_SIZE};
use crate::execution::relation::Relation;

/// Fixed seeds so that every relation partitioned by this process routes a
/// given key to the same bucket.
fn partition_random_state() -> RandomState {
    RandomState::with_seeds(
        0x517cc1b727220a95,
        0x3a8b7c9d1e2f4056,
        0x2545f4914f6cdd1d,
        0x9e3779b97f4a7c15,
    )
}

/// Maps join keys to bucket indices.
#[derive(Clone)]
pub struct BucketHasher {
    state: RandomState,
    num_buckets: usize,
}

impl BucketHasher {
    pub fn try_new(num_buckets: usize) -> JoinResult<Self> {
        if num_buckets == 0 {
            return Err(JoinError::Config(
                "bucket count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            state: partition_random_state(),
            num_buckets,
        })
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    /// Keys are hashed by integer value, so keys that join always share a
    /// bucket even if their text differs (`7` and `007`).
    pub fn bucket_for(&self, key: i64) -> usize {
        (self.state.hash_one(key) % self.num_buckets as u64) as usize
    }
}

/// Bucket files and per-bucket row counts of one partitioned relation.
#[derive(Debug, Clone)]
pub struct PartitionCounts {
    relation: Relation,
    paths: Vec<PathBuf>,
    counts: Vec<u64>,
}

impl PartitionCounts {
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn num_buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, bucket: usize) -> u64 {
        self.counts[bucket]
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn path(&self, bucket: usize) -> &Path {
        &self.paths[bucket]
    }

    pub fn total_rows(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bucket `i` as a relation of its own, keyed like the source relation.
    pub fn bucket_relation(&self, bucket: usize) -> Relation {
        Relation::with_row_count(
            bucket_name(self.relation.name(), bucket),
            self.paths[bucket].clone(),
            self.relation.key_index(),
            self.counts[bucket],
        )
    }

    /// Deletes the bucket files.
    pub fn remove_files(&self) -> JoinResult<()> {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn bucket_name(relation: &str, bucket: usize) -> String {
    format!("{relation}_{bucket}")
}

/// Splits relations into bucket files by the hash of their join key.
///
/// One `Partitioner` must be used for both inputs of a join: it owns the
/// hash function and bucket count, so both relations are split the same way.
pub struct Partitioner {
    hasher: BucketHasher,
    work_dir: PathBuf,
    delimiter: char,
}

impl Partitioner {
    pub fn try_new(num_buckets: usize, work_dir: impl Into<PathBuf>, delimiter: char) -> JoinResult<Self> {
        Ok(Self {
            hasher: BucketHasher::try_new(num_buckets)?,
            work_dir: work_dir.into(),
            delimiter,
        })
    }

    pub fn hasher(&self) -> &BucketHasher {
        &self.hasher
    }

    pub fn num_buckets(&self) -> usize {
        self.hasher.num_buckets()
    }

    /// Path of bucket `bucket` of the relation named `relation`.
    pub fn bucket_path(&self, relation: &str, bucket: usize) -> PathBuf {
        self.work_dir
            .join(format!("{}.csv", bucket_name(relation, bucket)))
    }

    /// Creates `n` bucket files and routes every row of `relation` to one of
    /// them in a single sequential scan. Any read, parse or write failure
    /// aborts the pass.
    pub fn partition(&self, relation: &Relation, key_index: usize) -> JoinResult<PartitionCounts> {
        let num_buckets = self.num_buckets();
        fs::create_dir_all(&self.work_dir)?;

        let paths: Vec<PathBuf> = (0..num_buckets)
            .map(|i| self.bucket_path(relation.name(), i))
            .collect();
        let mut writers: Vec<BufWriter<File>> = paths
            .iter()
            .map(|path| create_for_write(path).map(|f| BufWriter::with_capacity(FANOUT_BUFFER_SIZE, f)))
            .collect::<JoinResult<_>>()?;
        let mut counts = vec![0u64; num_buckets];

        let reader = DelimitedReader::with_capacity(relation.path(), self.delimiter, IO_BUFFER_SIZE)?;
        for record in reader {
            let record = record?;
            let key = record.key(key_index, relation.name())?;
            let bucket = self.hasher.bucket_for(key);
            record.write_line(&mut writers[bucket], self.delimiter)?;
            counts[bucket] += 1;
        }

        for writer in writers.iter_mut() {
            writer.flush()?;
        }

        // counts come from the scan, not from the handle
        let total: u64 = counts.iter().sum();
        info!(
            "Partitioner: split '{}' ({} rows) into {} buckets ({} empty)",
            relation.name(),
            total,
            num_buckets,
            counts.iter().filter(|c| **c == 0).count()
        );
        for (i, count) in counts.iter().enumerate() {
            debug!("Partitioner: {}[{}] = {} rows", relation.name(), i, count);
        }

        let relation = Relation::with_row_count(relation.name(), relation.path(), key_index, total);
        Ok(PartitionCounts {
            relation,
            paths,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::io::read_all;

    fn write_relation(dir: &Path, name: &str, rows: &[&str]) -> Relation {
        let path = dir.join(format!("{name}.csv"));
        let mut contents = rows.join("\n");
        contents.push('\n');
        fs::write(&path, contents).unwrap();
        Relation::try_new(name, path, 0).unwrap()
    }

    #[test]
    fn counts_sum_to_relation_size() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = (0..500).map(|i| format!("{},{}", i % 37, i)).collect();
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        let relation = write_relation(dir.path(), "r", &rows);

        for n in [1, 2, 7, 64] {
            let partitioner = Partitioner::try_new(n, dir.path().join("work"), ',').unwrap();
            let counts = partitioner.partition(&relation, 0).unwrap();
            assert_eq!(counts.num_buckets(), n);
            assert_eq!(counts.total_rows(), 500);
            for bucket in 0..n {
                let records = read_all(counts.path(bucket), ',').unwrap();
                assert_eq!(records.len() as u64, counts.count(bucket));
                for record in records {
                    let key = record.key(0, "r").unwrap();
                    assert_eq!(partitioner.hasher().bucket_for(key), bucket);
                }
            }
        }
    }

    #[test]
    fn equal_keys_land_in_the_same_bucket_across_relations() {
        let dir = tempfile::tempdir().unwrap();
        let r = write_relation(dir.path(), "r", &["5,a", "12,b", "99,c"]);
        let s = write_relation(dir.path(), "s", &["x,12", "y,0005", "z,99"]);
        let partitioner = Partitioner::try_new(8, dir.path(), ',').unwrap();

        let r_counts = partitioner.partition(&r, 0).unwrap();
        let s_counts = partitioner.partition(&s, 1).unwrap();
        for key in [5i64, 12, 99] {
            let bucket = partitioner.hasher().bucket_for(key);
            assert!(r_counts.count(bucket) > 0);
            assert!(s_counts.count(bucket) > 0);
        }
    }

    #[test]
    fn creates_every_bucket_file_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let relation = write_relation(dir.path(), "r", &["1,a"]);
        let partitioner = Partitioner::try_new(4, dir.path(), ',').unwrap();
        let counts = partitioner.partition(&relation, 0).unwrap();
        for bucket in 0..4 {
            assert!(counts.path(bucket).exists());
        }
        counts.remove_files().unwrap();
        for bucket in 0..4 {
            assert!(!counts.path(bucket).exists());
        }
    }

    #[test]
    fn counts_come_from_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        fs::write(&path, "1,a\n2,b\n3,c\n").unwrap();
        let stale = Relation::with_row_count("r", path, 0, 10);

        let partitioner = Partitioner::try_new(2, dir.path().join("work"), ',').unwrap();
        let counts = partitioner.partition(&stale, 0).unwrap();
        assert_eq!(counts.total_rows(), 3);
        assert_eq!(counts.relation().num_rows(), 3);
        assert_eq!(counts.bucket_relation(0).num_rows(), counts.count(0));
    }

    #[test]
    fn malformed_key_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let relation = write_relation(dir.path(), "r", &["1,a", "oops,b"]);
        let partitioner = Partitioner::try_new(2, dir.path(), ',').unwrap();
        assert!(matches!(
            partitioner.partition(&relation, 0),
            Err(JoinError::MalformedKey { .. })
        ));
    }

    #[test]
    fn zero_buckets_is_rejected() {
        assert!(matches!(
            Partitioner::try_new(0, ".", ','),
            Err(JoinError::Config(_))
        ));
    }
}
