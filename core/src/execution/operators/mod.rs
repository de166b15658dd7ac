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

//! Join operators

use std::path::PathBuf;
use std::time::Duration;

pub use classic_hash_join::{ClassicHashJoin, InMemoryHashJoin};
pub use grace_hash_join::GraceHashJoin;
pub use merge_scanner::{Cursor, MergeScanner, ScanState};
pub use partitioner::{BucketHasher, PartitionCounts, Partitioner};
pub use sort_merge_join::SortMergeJoin;

mod classic_hash_join;
mod grace_hash_join;
mod merge_scanner;
mod partitioner;
mod sort_merge_join;

use crate::errors::{JoinError, JoinResult};
use crate::execution::config::JoinConfig;
use crate::execution::relation::Relation;

/// What a finished join did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub output_path: PathBuf,
    /// Rows written to the output file.
    pub output_rows: u64,
    /// Bucket pairs handed to the classic hash join.
    pub buckets_joined: usize,
    /// Bucket pairs skipped because one side was empty.
    pub buckets_skipped: usize,
    /// Pages read by the merge scan, both sides together.
    pub pages_loaded: usize,
    /// Times the merge scan rewound the right side to a mark.
    pub mark_resets: usize,
    /// Partitioning (hash join) or sorting (sort-merge join).
    pub prepare_time: Duration,
    /// Per-bucket joins or the merge scan.
    pub join_time: Duration,
}

/// Checks that must pass before any scratch file is written.
pub(crate) fn validate_join_inputs(r: &Relation, s: &Relation, config: &JoinConfig) -> JoinResult<()> {
    config.validate()?;
    if r.name() == s.name() {
        return Err(JoinError::Config(format!(
            "both relations are named '{}'; scratch files in {} would collide",
            r.name(),
            config.work_dir.display()
        )));
    }
    Ok(())
}
