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

//! Grace hash join.
//!
//! Both relations are hash partitioned into N bucket files with the same
//! hash function, then each pair of buckets with rows on both sides is
//! joined by a [`ClassicHashJoin`]. Bucket pairs are independent, so they can
//! also be joined on a bounded pool of blocking workers that stream their
//! rows to a single output writer.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Semaphore};

use crate::errors::{JoinError, JoinResult};
use crate::execution::config::JoinConfig;
use crate::execution::io::{OutputWriter, RowSink};
use crate::execution::operators::classic_hash_join::{ClassicHashJoin, InMemoryHashJoin};
use crate::execution::operators::partitioner::{PartitionCounts, Partitioner};
use crate::execution::operators::{validate_join_inputs, JoinSummary};
use crate::execution::relation::{Record, Relation};
use crate::execution::tracing::PhaseGuard;

/// Rows a worker collects before handing them to the output writer.
const WORKER_BATCH_ROWS: usize = 1024;

pub struct GraceHashJoin {
    r: Relation,
    s: Relation,
    output_path: PathBuf,
    config: JoinConfig,
    partitioner: Partitioner,
    classic_join: Arc<dyn ClassicHashJoin>,
}

impl GraceHashJoin {
    /// Validates the configuration up front: a bad bucket count or clashing
    /// relation names cannot be detected once partitioning has started.
    pub fn try_new(
        r: Relation,
        s: Relation,
        output_path: impl Into<PathBuf>,
        config: JoinConfig,
    ) -> JoinResult<Self> {
        validate_join_inputs(&r, &s, &config)?;
        let partitioner = Partitioner::try_new(config.num_buckets, &config.work_dir, config.delimiter)?;
        let classic_join = Arc::new(InMemoryHashJoin::new(config.delimiter));
        Ok(Self {
            r,
            s,
            output_path: output_path.into(),
            config,
            partitioner,
            classic_join,
        })
    }

    /// Replaces the per-bucket join.
    pub fn with_classic_join(mut self, classic_join: Arc<dyn ClassicHashJoin>) -> Self {
        self.classic_join = classic_join;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Partitions R and then S with the one shared partitioner.
    pub fn partition_both(&self) -> JoinResult<(PartitionCounts, PartitionCounts)> {
        let r_counts = self.partitioner.partition(&self.r, self.r.key_index())?;
        let s_counts = self.partitioner.partition(&self.s, self.s.key_index())?;
        Ok((r_counts, s_counts))
    }

    /// Bucket indices with rows on both sides. All others cannot produce a
    /// match and are never opened.
    fn ready_buckets(r_counts: &PartitionCounts, s_counts: &PartitionCounts) -> Vec<usize> {
        (0..r_counts.num_buckets())
            .filter(|&bucket| {
                let ready = r_counts.count(bucket) > 0 && s_counts.count(bucket) > 0;
                if !ready {
                    debug!(
                        "GraceHashJoin: skipping bucket {} (r={}, s={})",
                        bucket,
                        r_counts.count(bucket),
                        s_counts.count(bucket)
                    );
                }
                ready
            })
            .collect()
    }

    fn cleanup(&self, r_counts: &PartitionCounts, s_counts: &PartitionCounts) {
        if self.config.retain_scratch {
            return;
        }
        for counts in [r_counts, s_counts] {
            if let Err(e) = counts.remove_files() {
                warn!(
                    "GraceHashJoin: failed to remove bucket files of '{}': {e}",
                    counts.relation().name()
                );
            }
        }
    }

    /// Joins bucket pairs one after another on the calling thread.
    pub fn run(&self) -> JoinResult<JoinSummary> {
        info!(
            "GraceHashJoin: joining {} with {} into {} buckets",
            self.r,
            self.s,
            self.partitioner.num_buckets()
        );

        let partition_phase = PhaseGuard::new("GraceHashJoin::partition");
        let (r_counts, s_counts) = self.partition_both()?;
        let prepare_time = partition_phase.elapsed();
        drop(partition_phase);

        let join_phase = PhaseGuard::new("GraceHashJoin::join");
        let ready = Self::ready_buckets(&r_counts, &s_counts);
        let mut writer = OutputWriter::new(
            &self.output_path,
            self.config.delimiter,
            self.config.output_buffer_rows(),
        );
        for &bucket in &ready {
            let rows = self.classic_join.join(
                &r_counts.bucket_relation(bucket),
                &s_counts.bucket_relation(bucket),
                &mut writer,
            )?;
            debug!("GraceHashJoin: bucket {} produced {} rows", bucket, rows);
        }
        let output_rows = writer.finish()?;
        let join_time = join_phase.elapsed();
        drop(join_phase);

        self.cleanup(&r_counts, &s_counts);

        let summary = JoinSummary {
            output_path: self.output_path.clone(),
            output_rows,
            buckets_joined: ready.len(),
            buckets_skipped: self.partitioner.num_buckets() - ready.len(),
            prepare_time,
            join_time,
            ..Default::default()
        };
        info!(
            "GraceHashJoin: {} rows written, {} buckets joined, {} skipped (partition {:?}, join {:?})",
            summary.output_rows,
            summary.buckets_joined,
            summary.buckets_skipped,
            summary.prepare_time,
            summary.join_time
        );
        Ok(summary)
    }

    /// Joins bucket pairs on at most `max_concurrent_buckets` blocking
    /// workers. Workers send row batches over a bounded channel to a single
    /// writer, so the output file has exactly one owner.
    pub async fn run_concurrent(&self) -> JoinResult<JoinSummary> {
        let max_workers = self.config.max_concurrent_buckets;
        info!(
            "GraceHashJoin: joining {} with {} into {} buckets, {} workers",
            self.r,
            self.s,
            self.partitioner.num_buckets(),
            max_workers
        );

        let partition_phase = PhaseGuard::new("GraceHashJoin::partition");
        let (r_counts, s_counts) = self.partition_both()?;
        let prepare_time = partition_phase.elapsed();
        drop(partition_phase);

        let join_phase = PhaseGuard::new("GraceHashJoin::join_concurrent");
        let ready = Self::ready_buckets(&r_counts, &s_counts);

        let (tx, mut rx) = mpsc::channel::<Vec<Record>>(max_workers * 2);
        let output_path = self.output_path.clone();
        let delimiter = self.config.delimiter;
        let buffer_rows = self.config.output_buffer_rows();
        let writer_task = tokio::task::spawn_blocking(move || -> JoinResult<u64> {
            let mut writer = OutputWriter::new(output_path, delimiter, buffer_rows);
            while let Some(batch) = rx.blocking_recv() {
                writer.emit_all(batch)?;
            }
            writer.finish()
        });

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut workers = Vec::with_capacity(ready.len());
        for &bucket in &ready {
            let r_bucket = r_counts.bucket_relation(bucket);
            let s_bucket = s_counts.bucket_relation(bucket);
            let classic_join = Arc::clone(&self.classic_join);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            workers.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| JoinError::Internal(format!("worker pool closed: {e}")))?;
                let rows = tokio::task::spawn_blocking(move || -> JoinResult<u64> {
                    let mut sink = ChannelSink::new(tx, WORKER_BATCH_ROWS);
                    let rows = classic_join.join(&r_bucket, &s_bucket, &mut sink)?;
                    sink.finish()?;
                    debug!("GraceHashJoin: bucket {} produced {} rows", bucket, rows);
                    Ok(rows)
                })
                .await??;
                Ok::<u64, JoinError>(rows)
            }));
        }
        // The writer stops once every worker has dropped its sender.
        drop(tx);

        let worker_results = join_all(workers).await;
        let writer_result = writer_task.await?;

        // A failed writer makes workers fail on send, so report it first.
        let output_rows = writer_result?;
        for result in worker_results {
            result??;
        }
        let join_time = join_phase.elapsed();
        drop(join_phase);

        self.cleanup(&r_counts, &s_counts);

        let summary = JoinSummary {
            output_path: self.output_path.clone(),
            output_rows,
            buckets_joined: ready.len(),
            buckets_skipped: self.partitioner.num_buckets() - ready.len(),
            prepare_time,
            join_time,
            ..Default::default()
        };
        info!(
            "GraceHashJoin: {} rows written, {} buckets joined concurrently, {} skipped",
            summary.output_rows, summary.buckets_joined, summary.buckets_skipped
        );
        Ok(summary)
    }
}

/// Batches a worker's rows and sends them to the output writer.
struct ChannelSink {
    tx: mpsc::Sender<Vec<Record>>,
    batch: Vec<Record>,
    batch_rows: usize,
}

impl ChannelSink {
    fn new(tx: mpsc::Sender<Vec<Record>>, batch_rows: usize) -> Self {
        Self {
            tx,
            batch: Vec::with_capacity(batch_rows),
            batch_rows,
        }
    }

    fn send(&mut self) -> JoinResult<()> {
        let batch = mem::replace(&mut self.batch, Vec::with_capacity(self.batch_rows));
        self.tx
            .blocking_send(batch)
            .map_err(|_| JoinError::Internal("output writer stopped".to_string()))
    }

    fn finish(mut self) -> JoinResult<()> {
        if !self.batch.is_empty() {
            self.send()?;
        }
        Ok(())
    }
}

impl RowSink for ChannelSink {
    fn emit(&mut self, record: Record) -> JoinResult<()> {
        self.batch.push(record);
        if self.batch.len() >= self.batch_rows {
            self.send()?;
        }
        Ok(())
    }
}
