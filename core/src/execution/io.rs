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

//! Reading and writing delimited row files.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::{JoinError, JoinResult};
use crate::execution::relation::Record;

/// I/O buffer size for sequential scans and output flushes.
pub(crate) const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Buffer size for each of the many files open at once while partitioning
/// or merging runs. Kept small so `n` open writers stay cheap.
pub(crate) const FANOUT_BUFFER_SIZE: usize = 32 * 1024;

/// Strips the line terminator. Returns `None` for blank lines, which are
/// not rows.
pub(crate) fn trim_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Counts the rows of a delimited file with one sequential scan.
pub fn count_rows(path: &Path) -> JoinResult<u64> {
    let file = open_for_read(path)?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, file);
    let mut line = String::new();
    let mut rows = 0u64;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if trim_line(&line).is_some() {
            rows += 1;
        }
    }
    Ok(rows)
}

pub(crate) fn open_for_read(path: &Path) -> JoinResult<File> {
    File::open(path).map_err(|e| {
        JoinError::IO {
            source: std::io::Error::new(
                e.kind(),
                format!("Failed to open '{}' for reading: {e}", path.display()),
            ),
        }
    })
}

/// Creates (or truncates) `path` for writing.
pub(crate) fn create_for_write(path: &Path) -> JoinResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| JoinError::IO {
            source: std::io::Error::new(
                e.kind(),
                format!("Failed to create '{}': {e}", path.display()),
            ),
        })
}

fn open_for_append(path: &Path) -> JoinResult<File> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| JoinError::IO {
            source: std::io::Error::new(
                e.kind(),
                format!("Failed to open '{}' for append: {e}", path.display()),
            ),
        })
}

/// Sequential reader over the rows of a delimited file.
pub struct DelimitedReader {
    reader: BufReader<File>,
    delimiter: char,
    line: String,
}

impl DelimitedReader {
    pub fn try_new(path: &Path, delimiter: char) -> JoinResult<Self> {
        Self::with_capacity(path, delimiter, IO_BUFFER_SIZE)
    }

    pub(crate) fn with_capacity(path: &Path, delimiter: char, capacity: usize) -> JoinResult<Self> {
        let file = open_for_read(path)?;
        Ok(Self {
            reader: BufReader::with_capacity(capacity, file),
            delimiter,
            line: String::new(),
        })
    }

    /// Reads the next row, or `None` at end of file.
    pub fn read_record(&mut self) -> JoinResult<Option<Record>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if let Some(line) = trim_line(&self.line) {
                return Ok(Some(Record::parse(line, self.delimiter)));
            }
        }
    }
}

impl Iterator for DelimitedReader {
    type Item = JoinResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Destination for joined rows.
pub trait RowSink {
    fn emit(&mut self, record: Record) -> JoinResult<()>;
}

/// Whether the next flush creates the output file or appends to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Append,
}

/// Buffered writer for a join's output file.
///
/// Rows are held in memory until `capacity` of them are buffered, then
/// written out in one go. The first flush creates (truncating) the file and
/// later flushes append, so callers only ever see [`RowSink::emit`].
pub struct OutputWriter {
    path: PathBuf,
    delimiter: char,
    buffer: Vec<Record>,
    capacity: usize,
    mode: WriteMode,
    rows_written: u64,
    flush_count: usize,
}

impl OutputWriter {
    pub fn new(path: impl Into<PathBuf>, delimiter: char, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            path: path.into(),
            delimiter,
            buffer: Vec::with_capacity(capacity),
            capacity,
            mode: WriteMode::Create,
            rows_written: 0,
            flush_count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows emitted so far, including those still buffered.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_written + self.buffer.len() as u64
    }

    /// Appends a batch of rows, flushing whenever the buffer fills up.
    pub fn emit_all(&mut self, records: Vec<Record>) -> JoinResult<()> {
        for record in records {
            self.emit(record)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> JoinResult<()> {
        let file = match self.mode {
            WriteMode::Create => create_for_write(&self.path)?,
            WriteMode::Append => open_for_append(&self.path)?,
        };
        let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, file);
        for record in &self.buffer {
            record.write_line(&mut writer, self.delimiter)?;
        }
        writer.flush()?;

        self.rows_written += self.buffer.len() as u64;
        self.flush_count += 1;
        self.mode = WriteMode::Append;
        self.buffer.clear();
        Ok(())
    }

    /// Writes any buffered rows and makes sure the output file exists, even
    /// if no row was ever emitted. Returns the number of rows written.
    pub fn finish(mut self) -> JoinResult<u64> {
        if !self.buffer.is_empty() || self.mode == WriteMode::Create {
            self.flush()?;
        }
        debug!(
            "OutputWriter: finished {} with {} rows in {} flushes",
            self.path.display(),
            self.rows_written,
            self.flush_count
        );
        Ok(self.rows_written)
    }
}

impl RowSink for OutputWriter {
    fn emit(&mut self, record: Record) -> JoinResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }
}

impl RowSink for Vec<Record> {
    fn emit(&mut self, record: Record) -> JoinResult<()> {
        self.push(record);
        Ok(())
    }
}

/// Reads every row of a file into memory. Intended for small files and
/// tests.
pub fn read_all(path: &Path, delimiter: char) -> JoinResult<Vec<Record>> {
    DelimitedReader::try_new(path, delimiter)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reader_skips_blank_lines_and_carriage_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        fs::write(&path, "1,a\r\n\n2,b\n3,c").unwrap();

        let rows = read_all(&path, ',').unwrap();
        assert_eq!(
            rows,
            vec![
                Record::from(vec!["1", "a"]),
                Record::from(vec!["2", "b"]),
                Record::from(vec!["3", "c"]),
            ]
        );
        assert_eq!(count_rows(&path).unwrap(), 3);
    }

    #[test]
    fn missing_input_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DelimitedReader::try_new(&dir.path().join("nope.csv"), ',');
        assert!(matches!(result, Err(JoinError::IO { .. })));
    }

    #[test]
    fn output_writer_flushes_at_capacity_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale contents\n").unwrap();

        let mut writer = OutputWriter::new(&path, ',', 2);
        writer.emit(Record::from(vec!["1", "a"])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "stale contents\n");

        writer.emit(Record::from(vec!["2", "b"])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1,a\n2,b\n");

        writer.emit(Record::from(vec!["3", "c"])).unwrap();
        assert_eq!(writer.rows_emitted(), 3);
        assert_eq!(writer.finish().unwrap(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1,a\n2,b\n3,c\n");
    }

    #[test]
    fn output_writer_creates_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let writer = OutputWriter::new(&path, ',', 8);
        assert_eq!(writer.finish().unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
