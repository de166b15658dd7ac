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

//! Page-at-a-time merge of two sorted relations.
//!
//! The scanner keeps exactly one page of each side in memory. Duplicate keys
//! on the right are handled with a mark: the absolute position of the first
//! right row of the current key group. After the group has been joined with
//! one left row, the right cursor is rewound to the mark so the next left row
//! with the same key sees the whole group again, even when the group spans
//! several right pages.

use std::cmp::Ordering;
use std::fmt;

use log::debug;

use crate::errors::{JoinError, JoinResult};
use crate::execution::io::RowSink;
use crate::execution::paging::PageManager;
use crate::execution::relation::{Page, Record};

/// Absolute position of a row: page index and row within the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub page: usize,
    pub row: usize,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Looking for the next left row whose key exists on the right.
    ScanningLeft,
    /// Emitting the current left row against the right group starting at
    /// `mark`.
    InMatchGroup { mark: Cursor },
    /// The right group has ended. Rewind to `mark` and move to the next
    /// left row.
    ResettingToMark { mark: Cursor },
    /// The right side has no rows left, or the whole left side was scanned.
    Exhausted,
}

/// Outcome of one step of the state machine.
enum Step {
    Continue,
    /// The current left page has no more rows.
    PageDone,
    Exhausted,
}

struct LeftSide {
    pages: PageManager,
    page: Page,
    row: usize,
}

impl LeftSide {
    fn current(&self) -> Option<&Record> {
        self.page.get(self.row)
    }

    fn key(&self, record: &Record) -> JoinResult<i64> {
        let relation = self.pages.relation();
        record.key(relation.key_index(), relation.name())
    }
}

struct RightSide {
    pages: PageManager,
    page: Page,
    cursor: Cursor,
}

impl RightSide {
    fn current(&self) -> Option<&Record> {
        self.page.get(self.cursor.row)
    }

    fn key(&self, record: &Record) -> JoinResult<i64> {
        let relation = self.pages.relation();
        record.key(relation.key_index(), relation.name())
    }

    /// Moves to the next right row, loading the next page when needed.
    /// Returns false when the right side is exhausted.
    fn advance(&mut self) -> JoinResult<bool> {
        self.cursor.row += 1;
        if self.cursor.row < self.page.len() {
            return Ok(true);
        }
        let next = self.cursor.page + 1;
        if next >= self.pages.num_pages() {
            return Ok(false);
        }
        self.page = self.pages.load_page(next)?;
        self.cursor = Cursor { page: next, row: 0 };
        Ok(true)
    }

    fn restore(&mut self, mark: Cursor) -> JoinResult<()> {
        if self.page.index() != mark.page {
            self.page = self.pages.load_page(mark.page)?;
        }
        self.cursor = mark;
        Ok(())
    }
}

/// Merges two relations sorted ascending by key and emits every pair of
/// rows with equal keys as the left row's fields followed by the right
/// row's.
pub struct MergeScanner {
    left: LeftSide,
    right: RightSide,
    state: ScanState,
    rows_emitted: u64,
    mark_resets: usize,
}

impl MergeScanner {
    /// Both page managers should use the same page size. Neither input is
    /// read until [`MergeScanner::scan`].
    pub fn new(left: PageManager, right: PageManager) -> Self {
        Self {
            left: LeftSide {
                pages: left,
                page: Page::new(0, Vec::new()),
                row: 0,
            },
            right: RightSide {
                pages: right,
                page: Page::new(0, Vec::new()),
                cursor: Cursor::default(),
            },
            state: ScanState::ScanningLeft,
            rows_emitted: 0,
            mark_resets: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Times the right cursor was rewound to a mark.
    pub fn mark_resets(&self) -> usize {
        self.mark_resets
    }

    /// Page loads on both sides, including reloads after a rewind.
    pub fn pages_loaded(&self) -> usize {
        self.left.pages.pages_loaded() + self.right.pages.pages_loaded()
    }

    /// Runs the merge to completion. Returns the number of rows emitted.
    pub fn scan(&mut self, sink: &mut dyn RowSink) -> JoinResult<u64> {
        if self.state == ScanState::Exhausted {
            return Ok(self.rows_emitted);
        }
        if self.left.pages.num_pages() == 0 || self.right.pages.num_pages() == 0 {
            self.state = ScanState::Exhausted;
            return Ok(0);
        }

        self.right.page = self.right.pages.load_page(0)?;
        self.right.cursor = Cursor::default();

        'pages: for page in 0..self.left.pages.num_pages() {
            self.left.page = self.left.pages.load_page(page)?;
            self.left.row = 0;
            loop {
                match self.step(sink)? {
                    Step::Continue => {}
                    Step::PageDone => break,
                    Step::Exhausted => break 'pages,
                }
            }
        }
        self.state = ScanState::Exhausted;

        debug!(
            "MergeScanner: {} rows from '{}' x '{}', {} pages loaded, {} mark resets",
            self.rows_emitted,
            self.left.pages.relation().name(),
            self.right.pages.relation().name(),
            self.pages_loaded(),
            self.mark_resets
        );
        Ok(self.rows_emitted)
    }

    fn step(&mut self, sink: &mut dyn RowSink) -> JoinResult<Step> {
        match self.state {
            ScanState::ScanningLeft => self.seek_match(),
            ScanState::InMatchGroup { mark } => {
                self.join_group(sink)?;
                self.state = ScanState::ResettingToMark { mark };
                Ok(Step::Continue)
            }
            ScanState::ResettingToMark { mark } => {
                self.right.restore(mark)?;
                self.mark_resets += 1;
                self.left.row += 1;
                self.state = ScanState::ScanningLeft;
                if self.left.row >= self.left.page.len() {
                    Ok(Step::PageDone)
                } else {
                    Ok(Step::Continue)
                }
            }
            ScanState::Exhausted => Ok(Step::Exhausted),
        }
    }

    /// Skips left rows below the right key and right rows below the left
    /// key until both keys agree, then marks the right position.
    fn seek_match(&mut self) -> JoinResult<Step> {
        loop {
            let Some(left) = self.left.current() else {
                return Ok(Step::PageDone);
            };
            let Some(right) = self.right.current() else {
                self.state = ScanState::Exhausted;
                return Ok(Step::Exhausted);
            };
            match self.left.key(left)?.cmp(&self.right.key(right)?) {
                Ordering::Less => self.left.row += 1,
                Ordering::Greater => {
                    // Inputs are sorted, so every remaining left key is above
                    // every right key once the right side runs out.
                    if !self.right.advance()? {
                        self.state = ScanState::Exhausted;
                        return Ok(Step::Exhausted);
                    }
                }
                Ordering::Equal => {
                    self.state = ScanState::InMatchGroup {
                        mark: self.right.cursor,
                    };
                    return Ok(Step::Continue);
                }
            }
        }
    }

    /// Emits the current left row against every right row with its key,
    /// leaving the right cursor on the first row past the group.
    fn join_group(&mut self, sink: &mut dyn RowSink) -> JoinResult<()> {
        let left = self.left.current().ok_or_else(|| {
            JoinError::Internal(format!(
                "match group without a left row at {}:{}",
                self.left.page.index(),
                self.left.row
            ))
        })?;
        let key = self.left.key(left)?;

        while let Some(right) = self.right.current() {
            if self.right.key(right)? != key {
                break;
            }
            sink.emit(left.concat(right))?;
            self.rows_emitted += 1;
            if !self.right.advance()? {
                break;
            }
        }
        Ok(())
    }
}
