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

use rand::{rngs::StdRng, Rng, SeedableRng};
use spilljoin::Relation;
use std::fs;
use std::path::Path;

/// Returns fixed seedable RNG
pub fn seedable_rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

/// Writes `rows` rows of `{key},{payload}` with keys drawn from
/// `0..distinct_keys`.
pub fn create_relation(dir: &Path, name: &str, rows: usize, distinct_keys: i64) -> Relation {
    let mut rng = seedable_rng();
    let contents: String = (0..rows)
        .map(|i| format!("{},{name}-{i}\n", rng.random_range(0..distinct_keys)))
        .collect();
    let path = dir.join(format!("{name}.csv"));
    fs::write(&path, contents).unwrap();
    Relation::try_new(name, path, 0).unwrap()
}
