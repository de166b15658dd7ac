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
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{JoinError, JoinResult};

pub const NUM_BUCKETS_KEY: &str = "spilljoin.hash.numBuckets";
pub const MAX_CONCURRENT_BUCKETS_KEY: &str = "spilljoin.hash.maxConcurrentBuckets";
pub const RECORDS_PER_PAGE_KEY: &str = "spilljoin.merge.recordsPerPage";
pub const NUM_BUFFERS_KEY: &str = "spilljoin.merge.numBuffers";
pub const DELIMITER_KEY: &str = "spilljoin.delimiter";
pub const WORK_DIR_KEY: &str = "spilljoin.workDir";
pub const RETAIN_SCRATCH_KEY: &str = "spilljoin.retainScratch";

/// Number of hash buckets when none is configured.
const DEFAULT_NUM_BUCKETS: usize = 16;

const DEFAULT_RECORDS_PER_PAGE: usize = 100;

const DEFAULT_NUM_BUFFERS: usize = 10;

const DEFAULT_MAX_CONCURRENT_BUCKETS: usize = 4;

/// Settings shared by both join strategies.
///
/// `records_per_page` and `num_buffers` size every page manager, sort run
/// and output buffer of a join. Both sides of a sort-merge join always use
/// the same values since they come from one `JoinConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinConfig {
    /// Hash buckets per relation for the grace hash join.
    pub num_buckets: usize,
    /// Rows per page, for paging and for sizing sort runs.
    pub records_per_page: usize,
    /// Buffer pages available; output flushes every
    /// `records_per_page * num_buffers` rows.
    pub num_buffers: usize,
    /// Field separator of every input, intermediate and output file.
    pub delimiter: char,
    /// Directory holding bucket files and sort runs.
    pub work_dir: PathBuf,
    /// Keep scratch files after a successful join.
    pub retain_scratch: bool,
    /// Bucket pairs joined at once by the concurrent grace hash join.
    pub max_concurrent_buckets: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            num_buckets: DEFAULT_NUM_BUCKETS,
            records_per_page: DEFAULT_RECORDS_PER_PAGE,
            num_buffers: DEFAULT_NUM_BUFFERS,
            delimiter: ',',
            work_dir: std::env::temp_dir().join("spilljoin"),
            retain_scratch: false,
            max_concurrent_buckets: DEFAULT_MAX_CONCURRENT_BUCKETS,
        }
    }
}

impl JoinConfig {
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_num_buckets(mut self, num_buckets: usize) -> Self {
        self.num_buckets = num_buckets;
        self
    }

    pub fn with_page_layout(mut self, records_per_page: usize, num_buffers: usize) -> Self {
        self.records_per_page = records_per_page;
        self.num_buffers = num_buffers;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_retain_scratch(mut self, retain_scratch: bool) -> Self {
        self.retain_scratch = retain_scratch;
        self
    }

    pub fn with_max_concurrent_buckets(mut self, max_concurrent_buckets: usize) -> Self {
        self.max_concurrent_buckets = max_concurrent_buckets;
        self
    }

    /// Rows buffered before the output file is written.
    pub fn output_buffer_rows(&self) -> usize {
        self.records_per_page.saturating_mul(self.num_buffers)
    }

    pub fn validate(&self) -> JoinResult<()> {
        if self.num_buckets == 0 {
            return Err(JoinError::Config(
                "bucket count must be at least 1".to_string(),
            ));
        }
        if self.records_per_page == 0 {
            return Err(JoinError::Config(
                "records per page must be at least 1".to_string(),
            ));
        }
        if self.num_buffers == 0 {
            return Err(JoinError::Config(
                "buffer count must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_buckets == 0 {
            return Err(JoinError::Config(
                "concurrent bucket limit must be at least 1".to_string(),
            ));
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(JoinError::Config(
                "delimiter cannot be a line terminator".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> JoinResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| JoinError::Config(format!("Invalid value for {key}: '{value}'")))
}

fn parse_delimiter(value: &str) -> JoinResult<char> {
    let delimiter = match value {
        "\\t" | "tab" => '\t',
        _ => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(JoinError::Config(format!(
                        "Invalid value for {DELIMITER_KEY}: '{value}', expected a single character"
                    )))
                }
            }
        }
    };
    Ok(delimiter)
}

/// Builds a validated `JoinConfig` from `spilljoin.*` string settings.
/// Keys that are absent keep their default.
pub fn parse_join_config(settings: &HashMap<String, String>) -> JoinResult<JoinConfig> {
    let mut config = JoinConfig::default();
    for (key, value) in settings {
        match key.as_str() {
            NUM_BUCKETS_KEY => config.num_buckets = parse_value(key, value)?,
            MAX_CONCURRENT_BUCKETS_KEY => config.max_concurrent_buckets = parse_value(key, value)?,
            RECORDS_PER_PAGE_KEY => config.records_per_page = parse_value(key, value)?,
            NUM_BUFFERS_KEY => config.num_buffers = parse_value(key, value)?,
            DELIMITER_KEY => config.delimiter = parse_delimiter(value)?,
            WORK_DIR_KEY => config.work_dir = PathBuf::from(value),
            RETAIN_SCRATCH_KEY => config.retain_scratch = parse_value(key, value)?,
            other if other.starts_with("spilljoin.") => {
                return Err(JoinError::Config(format!("Unknown setting: {other}")))
            }
            // settings for other components are not ours to judge
            _ => {}
        }
    }
    config.validate()?;
    Ok(config)
}
