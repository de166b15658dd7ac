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

//! Equi-joins over delimited files that do not fit in memory.
//!
//! Two strategies are provided:
//!
//! * [`GraceHashJoin`] hash partitions both relations into bucket files and
//!   joins each bucket pair in memory.
//! * [`SortMergeJoin`] externally sorts both relations and merges them one
//!   page at a time.
//!
//! Both write the matching pairs, left fields followed by right fields, to a
//! single delimited output file.

#![allow(clippy::upper_case_acronyms)]

use std::path::Path;

use log::{info, LevelFilter};
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{load_config_file, Appender, Deserializers, Root},
    encode::pattern::PatternEncoder,
    Config,
};

pub use errors::{JoinError, JoinResult};
pub use execution::config::{parse_join_config, JoinConfig};
pub use execution::operators::{GraceHashJoin, JoinSummary, SortMergeJoin};
pub use execution::relation::{Record, Relation};
pub use execution::sort::{ExternalSorter, RunMergeSorter};

pub mod errors;
pub mod execution;

/// Installs the global logger.
///
/// With no path, logs go to stderr at `INFO`. Otherwise the log4rs YAML
/// file at `config_path` is loaded. Fails if a logger is already installed.
pub fn init_logging(config_path: Option<&Path>) -> JoinResult<()> {
    let log_config = match config_path {
        None => default_logger_config()?,
        Some(path) => load_config_file(path, Deserializers::default())
            .map_err(|err| JoinError::Config(err.to_string()))?,
    };
    log4rs::init_config(log_config).map_err(|err| JoinError::Config(err.to_string()))?;

    info!("spilljoin logging initialized");
    Ok(())
}

const LOG_PATTERN: &str = "{d(%y/%m/%d %H:%M:%S)} {l} {f}: {m}{n}";

// Creates a default log4rs config, which logs to stderr with `INFO` level.
fn default_logger_config() -> JoinResult<Config> {
    let console_append = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();
    let appender = Appender::builder().build("console", Box::new(console_append));
    let root = Root::builder().appender("console").build(LevelFilter::Info);
    Config::builder()
        .appender(appender)
        .build(root)
        .map_err(|err| JoinError::Config(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logger_config_builds() {
        let config = default_logger_config().unwrap();
        assert_eq!(config.root().level(), LevelFilter::Info);
        assert_eq!(config.appenders().len(), 1);
    }

    #[test]
    fn missing_log_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = init_logging(Some(&dir.path().join("missing.yaml")));
        assert!(matches!(result, Err(JoinError::Config(_))));
    }
}
