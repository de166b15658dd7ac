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

//! Passive containers shared by both join strategies.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{JoinError, JoinResult};
use crate::execution::io::count_rows;

/// A delimited file on disk together with the index of its join key field.
///
/// A relation handle never changes once built. Steps that rewrite the data,
/// such as sorting, hand back a new handle pointing at the new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    name: String,
    path: PathBuf,
    key_index: usize,
    num_rows: u64,
}

impl Relation {
    /// Creates a relation, counting its rows with one sequential scan.
    pub fn try_new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        key_index: usize,
    ) -> JoinResult<Self> {
        let path = path.into();
        let num_rows = count_rows(&path)?;
        Ok(Self::with_row_count(name, path, key_index, num_rows))
    }

    /// Creates a relation whose row count is already known.
    pub fn with_row_count(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        key_index: usize,
        num_rows: u64,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            key_index,
            num_rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({}, key={}, rows={})",
            self.name,
            self.path.display(),
            self.key_index,
            self.num_rows
        )
    }
}

/// One row: an ordered sequence of opaque field values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Splits a line on `delimiter`. No quoting or escaping is recognised.
    pub fn parse(line: &str, delimiter: char) -> Self {
        Self {
            fields: line.split(delimiter).map(str::to_string).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw text of the field at `index`.
    pub fn field(&self, index: usize, relation: &str) -> JoinResult<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| JoinError::MissingField {
                relation: relation.to_string(),
                index,
                width: self.fields.len(),
            })
    }

    /// The join key at `index`, interpreted as a signed integer.
    pub fn key(&self, index: usize, relation: &str) -> JoinResult<i64> {
        let raw = self.field(index, relation)?;
        raw.trim()
            .parse::<i64>()
            .map_err(|_| JoinError::malformed_key(relation, raw))
    }

    /// The fields of `self` followed by the fields of `other`.
    pub fn concat(&self, other: &Record) -> Record {
        let mut fields = Vec::with_capacity(self.fields.len() + other.fields.len());
        fields.extend_from_slice(&self.fields);
        fields.extend_from_slice(&other.fields);
        Record { fields }
    }

    /// Writes the record as one delimited line terminated by `\n`.
    pub fn write_line<W: Write>(&self, writer: &mut W, delimiter: char) -> JoinResult<()> {
        let mut delim_buf = [0u8; 4];
        let delim = delimiter.encode_utf8(&mut delim_buf).as_bytes();
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                writer.write_all(delim)?;
            }
            writer.write_all(field.as_bytes())?;
        }
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl From<Vec<&str>> for Record {
    fn from(fields: Vec<&str>) -> Self {
        Self::new(fields.into_iter().map(str::to_string).collect())
    }
}

/// A window of at most `records_per_page` consecutive rows of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    index: usize,
    records: Vec<Record>,
}

impl Page {
    pub fn new(index: usize, records: Vec<Record>) -> Self {
        Self { index, records }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Record> {
        self.records.get(row)
    }
}
