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

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use log::debug;

use crate::errors::{JoinError, JoinResult};
use crate::execution::io::{open_for_read, trim_line, IO_BUFFER_SIZE};
use crate::execution::relation::{Page, Record, Relation};

/// Loads fixed-size pages of a relation on demand.
///
/// Construction performs one scan that records the byte offset at which
/// every page starts, so memory is proportional to the number of pages and
/// not the number of rows. Loading page `i` is a seek followed by reading at
/// most `records_per_page` rows.
pub struct PageManager {
    relation: Relation,
    records_per_page: usize,
    delimiter: char,
    page_offsets: Vec<u64>,
    reader: BufReader<File>,
    pages_loaded: usize,
}

impl PageManager {
    pub fn try_new(relation: &Relation, records_per_page: usize, delimiter: char) -> JoinResult<Self> {
        if records_per_page == 0 {
            return Err(JoinError::Config(
                "records per page must be at least 1".to_string(),
            ));
        }

        let file = open_for_read(relation.path())?;
        let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, file);
        let mut page_offsets = Vec::new();
        let mut line = String::new();
        let mut offset = 0u64;
        let mut rows = 0usize;
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if trim_line(&line).is_some() {
                if rows % records_per_page == 0 {
                    page_offsets.push(offset);
                }
                rows += 1;
            }
            offset += read as u64;
        }

        debug!(
            "PageManager: indexed {} rows of '{}' into {} pages of {}",
            rows,
            relation.name(),
            page_offsets.len(),
            records_per_page
        );

        Ok(Self {
            relation: relation.clone(),
            records_per_page,
            delimiter,
            page_offsets,
            reader,
            pages_loaded: 0,
        })
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn num_pages(&self) -> usize {
        self.page_offsets.len()
    }

    pub fn records_per_page(&self) -> usize {
        self.records_per_page
    }

    /// Number of `load_page` calls served so far.
    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    pub fn load_page(&mut self, index: usize) -> JoinResult<Page> {
        let offset = *self
            .page_offsets
            .get(index)
            .ok_or_else(|| JoinError::PageOutOfBounds {
                relation: self.relation.name().to_string(),
                page: index,
                num_pages: self.page_offsets.len(),
            })?;

        self.reader.seek(SeekFrom::Start(offset))?;
        let mut records = Vec::with_capacity(self.records_per_page);
        let mut line = String::new();
        while records.len() < self.records_per_page {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            if let Some(row) = trim_line(&line) {
                records.push(Record::parse(row, self.delimiter));
            }
        }

        self.pages_loaded += 1;
        Ok(Page::new(index, records))
    }
}
