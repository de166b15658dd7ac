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

//! External merge sort of a delimited file by its integer key.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::errors::{JoinError, JoinResult};
use crate::execution::config::JoinConfig;
use crate::execution::io::{create_for_write, DelimitedReader, FANOUT_BUFFER_SIZE, IO_BUFFER_SIZE};
use crate::execution::relation::{Record, Relation};
use crate::execution::tracing::PhaseGuard;

/// Produces a fully sorted copy of a relation.
///
/// The returned relation points at a new file under `work_dir`, ordered
/// ascending by the integer key at the relation's key index. The input file
/// is left untouched.
pub trait ExternalSorter: Send + Sync {
    fn sort(&self, relation: &Relation, work_dir: &Path) -> JoinResult<Relation>;
}

/// Sorted run generation followed by multi-pass k-way merging.
#[derive(Debug, Clone)]
pub struct RunMergeSorter {
    run_rows: usize,
    fan_in: usize,
    delimiter: char,
    retain_scratch: bool,
}

impl RunMergeSorter {
    /// Runs hold `records_per_page * num_buffers` rows. A merge reads one
    /// page from up to `num_buffers - 1` runs and keeps the last buffer for
    /// output, but never merges fewer than two runs at a time.
    pub fn new(records_per_page: usize, num_buffers: usize, delimiter: char) -> Self {
        Self {
            run_rows: records_per_page.saturating_mul(num_buffers).max(1),
            fan_in: num_buffers.saturating_sub(1).max(2),
            delimiter,
            retain_scratch: false,
        }
    }

    pub fn from_config(config: &JoinConfig) -> Self {
        Self::new(config.records_per_page, config.num_buffers, config.delimiter)
            .with_retain_scratch(config.retain_scratch)
    }

    /// Keep run and intermediate merge files instead of deleting them once
    /// merged.
    pub fn with_retain_scratch(mut self, retain_scratch: bool) -> Self {
        self.retain_scratch = retain_scratch;
        self
    }

    pub fn run_rows(&self) -> usize {
        self.run_rows
    }

    pub fn fan_in(&self) -> usize {
        self.fan_in
    }

    fn write_run(&self, relation: &Relation, rows: &mut Vec<(i64, Record)>, path: &Path) -> JoinResult<()> {
        // stable, so equal keys keep their input order
        rows.sort_by_key(|(key, _)| *key);
        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, create_for_write(path)?);
        for (_, record) in rows.drain(..) {
            record.write_line(&mut writer, self.delimiter)?;
        }
        writer.flush()?;
        debug!("RunMergeSorter: wrote run {} of '{}'", path.display(), relation.name());
        Ok(())
    }

    /// Splits the relation into sorted runs of at most `run_rows` rows.
    fn generate_runs(&self, relation: &Relation, work_dir: &Path) -> JoinResult<(Vec<PathBuf>, u64)> {
        let mut runs = Vec::new();
        let mut rows: Vec<(i64, Record)> = Vec::with_capacity(self.run_rows.min(1 << 16));
        let mut total = 0u64;

        for record in DelimitedReader::try_new(relation.path(), self.delimiter)? {
            let record = record?;
            let key = record.key(relation.key_index(), relation.name())?;
            rows.push((key, record));
            total += 1;
            if rows.len() == self.run_rows {
                let path = work_dir.join(format!("run_{}_{}.csv", relation.name(), runs.len()));
                self.write_run(relation, &mut rows, &path)?;
                runs.push(path);
            }
        }
        if !rows.is_empty() {
            let path = work_dir.join(format!("run_{}_{}.csv", relation.name(), runs.len()));
            self.write_run(relation, &mut rows, &path)?;
            runs.push(path);
        }
        Ok((runs, total))
    }

    /// Merges `inputs` into `output`. Ties go to the earlier input, which
    /// holds the earlier rows, so the merge is stable.
    fn merge(&self, relation: &Relation, inputs: &[PathBuf], output: &Path) -> JoinResult<u64> {
        let key_index = relation.key_index();
        let mut readers = inputs
            .iter()
            .map(|path| DelimitedReader::with_capacity(path, self.delimiter, FANOUT_BUFFER_SIZE))
            .collect::<JoinResult<Vec<_>>>()?;
        let mut heads: Vec<Option<Record>> = (0..readers.len()).map(|_| None).collect();
        let mut heap = BinaryHeap::with_capacity(readers.len());

        for (i, reader) in readers.iter_mut().enumerate() {
            if let Some(record) = reader.read_record()? {
                heap.push(Reverse((record.key(key_index, relation.name())?, i)));
                heads[i] = Some(record);
            }
        }

        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, create_for_write(output)?);
        let mut rows = 0u64;
        while let Some(Reverse((_, i))) = heap.pop() {
            let record = heads[i]
                .take()
                .ok_or_else(|| JoinError::Internal(format!("merge input {i} has no head row")))?;
            record.write_line(&mut writer, self.delimiter)?;
            rows += 1;

            if let Some(next) = readers[i].read_record()? {
                heap.push(Reverse((next.key(key_index, relation.name())?, i)));
                heads[i] = Some(next);
            }
        }
        writer.flush()?;
        Ok(rows)
    }

    fn remove_scratch(&self, paths: &[PathBuf]) {
        if self.retain_scratch {
            return;
        }
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                warn!("RunMergeSorter: failed to remove {}: {e}", path.display());
            }
        }
    }
}

impl ExternalSorter for RunMergeSorter {
    fn sort(&self, relation: &Relation, work_dir: &Path) -> JoinResult<Relation> {
        let _phase = PhaseGuard::new("RunMergeSorter::sort");
        fs::create_dir_all(work_dir)?;
        let sorted_name = format!("sorted_{}", relation.name());
        let sorted_path = work_dir.join(format!("{sorted_name}.csv"));

        let (mut runs, total) = self.generate_runs(relation, work_dir)?;
        let initial_runs = runs.len();

        let mut pass = 0usize;
        while runs.len() > 1 {
            let mut next = Vec::with_capacity(runs.len().div_ceil(self.fan_in));
            for group in runs.chunks(self.fan_in) {
                if group.len() == 1 {
                    next.push(group[0].clone());
                    continue;
                }
                let path = work_dir.join(format!("merge_{}_{}_{}.csv", relation.name(), pass, next.len()));
                let rows = self.merge(relation, group, &path)?;
                debug!(
                    "RunMergeSorter: pass {} merged {} runs of '{}' into {} ({} rows)",
                    pass,
                    group.len(),
                    relation.name(),
                    path.display(),
                    rows
                );
                self.remove_scratch(group);
                next.push(path);
            }
            runs = next;
            pass += 1;
        }

        match runs.pop() {
            Some(last) if self.retain_scratch => {
                fs::copy(&last, &sorted_path)?;
            }
            Some(last) => fs::rename(&last, &sorted_path)?,
            None => {
                create_for_write(&sorted_path)?;
            }
        }

        info!(
            "RunMergeSorter: sorted '{}' ({} rows) in {} runs and {} merge passes",
            relation.name(),
            total,
            initial_runs,
            pass
        );
        Ok(Relation::with_row_count(
            sorted_name,
            sorted_path,
            relation.key_index(),
            total,
        ))
    }
}
