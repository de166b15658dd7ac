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

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::errors::JoinResult;
use crate::execution::config::JoinConfig;
use crate::execution::io::OutputWriter;
use crate::execution::operators::merge_scanner::MergeScanner;
use crate::execution::operators::{validate_join_inputs, JoinSummary};
use crate::execution::paging::PageManager;
use crate::execution::relation::Relation;
use crate::execution::sort::{ExternalSorter, RunMergeSorter};
use crate::execution::tracing::PhaseGuard;

/// Sort-merge join of two relations that need not fit in memory.
///
/// Both inputs are first fully sorted by an [`ExternalSorter`], then merged
/// a page at a time by a [`MergeScanner`] with `records_per_page` rows per
/// page. Output rows are buffered up to `records_per_page * num_buffers`
/// before being written.
pub struct SortMergeJoin {
    left: Relation,
    right: Relation,
    /// Handles passed to `try_new`. Never deleted.
    inputs: (Relation, Relation),
    output_path: PathBuf,
    config: JoinConfig,
    sorter: Arc<dyn ExternalSorter>,
    sorted: bool,
}

impl SortMergeJoin {
    pub fn try_new(
        left: Relation,
        right: Relation,
        output_path: impl Into<PathBuf>,
        config: JoinConfig,
    ) -> JoinResult<Self> {
        validate_join_inputs(&left, &right, &config)?;
        let sorter = Arc::new(RunMergeSorter::from_config(&config));
        Ok(Self {
            inputs: (left.clone(), right.clone()),
            left,
            right,
            output_path: output_path.into(),
            config,
            sorter,
            sorted: false,
        })
    }

    /// Replaces the external sort.
    pub fn with_sorter(mut self, sorter: Arc<dyn ExternalSorter>) -> Self {
        self.sorter = sorter;
        self
    }

    pub fn left(&self) -> &Relation {
        &self.left
    }

    pub fn right(&self) -> &Relation {
        &self.right
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Sorts both inputs and swaps the relation handles for the sorted
    /// files. Calling it again before `run` completes is a no-op.
    pub fn sort(&mut self) -> JoinResult<()> {
        if self.sorted {
            return Ok(());
        }
        let left = self.sorter.sort(&self.left, &self.config.work_dir)?;
        let right = self.sorter.sort(&self.right, &self.config.work_dir)?;
        self.left = left;
        self.right = right;
        self.sorted = true;
        Ok(())
    }

    /// True for a sorted copy this join may delete: inside the work
    /// directory and not one of the caller's inputs.
    fn is_scratch(&self, relation: &Relation) -> bool {
        let (left, right) = &self.inputs;
        relation.path() != left.path()
            && relation.path() != right.path()
            && relation.path().starts_with(&self.config.work_dir)
    }

    /// Removes the sorted copies and points the handles back at the inputs,
    /// so the next `run` sorts again.
    fn cleanup(&mut self) {
        if !self.sorted {
            return;
        }
        if !self.config.retain_scratch {
            for relation in [&self.left, &self.right] {
                if !self.is_scratch(relation) {
                    continue;
                }
                if let Err(e) = fs::remove_file(relation.path()) {
                    warn!(
                        "SortMergeJoin: failed to remove {}: {e}",
                        relation.path().display()
                    );
                }
            }
        }
        let (left, right) = self.inputs.clone();
        self.left = left;
        self.right = right;
        self.sorted = false;
    }

    /// Sorts, merges and writes the output file. The output file is created
    /// even when no row matches. The join can be run again afterwards.
    pub fn run(&mut self) -> JoinResult<JoinSummary> {
        info!(
            "SortMergeJoin: joining {} with {} ({} rows per page, {} buffers)",
            self.left, self.right, self.config.records_per_page, self.config.num_buffers
        );

        let sort_phase = PhaseGuard::new("SortMergeJoin::sort");
        self.sort()?;
        let prepare_time = sort_phase.elapsed();
        drop(sort_phase);

        let merge_phase = PhaseGuard::new("SortMergeJoin::merge");
        let delimiter = self.config.delimiter;
        let left_pages = PageManager::try_new(&self.left, self.config.records_per_page, delimiter)?;
        let right_pages = PageManager::try_new(&self.right, self.config.records_per_page, delimiter)?;
        let mut writer = OutputWriter::new(&self.output_path, delimiter, self.config.output_buffer_rows());

        let mut scanner = MergeScanner::new(left_pages, right_pages);
        scanner.scan(&mut writer)?;
        let output_rows = writer.finish()?;
        let join_time = merge_phase.elapsed();
        drop(merge_phase);

        self.cleanup();

        let summary = JoinSummary {
            output_path: self.output_path.clone(),
            output_rows,
            pages_loaded: scanner.pages_loaded(),
            mark_resets: scanner.mark_resets(),
            prepare_time,
            join_time,
            ..Default::default()
        };
        info!(
            "SortMergeJoin: {} rows written, {} pages loaded, {} mark resets (sort {:?}, merge {:?})",
            summary.output_rows,
            summary.pages_loaded,
            summary.mark_resets,
            summary.prepare_time,
            summary.join_time
        );
        Ok(summary)
    }
}
