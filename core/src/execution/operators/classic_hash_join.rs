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

use std::collections::HashMap;

use ahash::RandomState;
use log::debug;

use crate::errors::JoinResult;
use crate::execution::io::{DelimitedReader, RowSink};
use crate::execution::relation::{Record, Relation};

/// Joins one pair of buckets whose rows fit in memory.
///
/// Implementations receive the exact row count of both inputs and may use
/// it to pick a build side. Every matching pair is emitted once, as the
/// fields of the `r` row followed by the fields of the `s` row. No ordering
/// of the output is promised.
pub trait ClassicHashJoin: Send + Sync {
    fn join(&self, r: &Relation, s: &Relation, sink: &mut dyn RowSink) -> JoinResult<u64>;
}

/// Seeds for the build table. Deliberately unrelated to the partitioning
/// seeds: every key in one bucket already agrees on the partition hash.
fn build_random_state() -> RandomState {
    RandomState::with_seeds(
        0x243f6a8885a308d3,
        0x13198a2e03707344,
        0xa4093822299f31d0,
        0x082efa98ec4e6c89,
    )
}

/// Builds a hash table over the smaller input and streams the larger one
/// past it.
#[derive(Debug, Clone)]
pub struct InMemoryHashJoin {
    delimiter: char,
}

impl InMemoryHashJoin {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl ClassicHashJoin for InMemoryHashJoin {
    fn join(&self, r: &Relation, s: &Relation, sink: &mut dyn RowSink) -> JoinResult<u64> {
        let build_r = r.num_rows() <= s.num_rows();
        let (build, probe) = if build_r { (r, s) } else { (s, r) };

        let mut table: HashMap<i64, Vec<Record>, RandomState> =
            HashMap::with_capacity_and_hasher(build.num_rows() as usize, build_random_state());
        for record in DelimitedReader::try_new(build.path(), self.delimiter)? {
            let record = record?;
            let key = record.key(build.key_index(), build.name())?;
            table.entry(key).or_default().push(record);
        }

        let mut emitted = 0u64;
        for record in DelimitedReader::try_new(probe.path(), self.delimiter)? {
            let record = record?;
            let key = record.key(probe.key_index(), probe.name())?;
            let Some(matches) = table.get(&key) else {
                continue;
            };
            for matched in matches {
                let joined = if build_r {
                    matched.concat(&record)
                } else {
                    record.concat(matched)
                };
                sink.emit(joined)?;
                emitted += 1;
            }
        }

        debug!(
            "InMemoryHashJoin: built on '{}' ({} rows, {} keys), probed '{}', {} rows out",
            build.name(),
            build.num_rows(),
            table.len(),
            probe.name(),
            emitted
        );
        Ok(emitted)
    }
}
