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

//! Errors raised while partitioning, sorting and joining relations.

use std::result;

#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    /// Rejected before any scratch file is written.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// The join key of a row could not be read as an integer.
    #[error("Malformed join key '{value}' in relation '{relation}'")]
    MalformedKey { relation: String, value: String },

    /// The join key index points past the end of a row.
    #[error("Relation '{relation}' has a row with {width} fields, join key index {index} is out of bounds")]
    MissingField {
        relation: String,
        index: usize,
        width: usize,
    },

    #[error("Page {page} out of bounds for relation '{relation}' with {num_pages} pages")]
    PageOutOfBounds {
        relation: String,
        page: usize,
        num_pages: usize,
    },

    #[error("Join Internal Error: {0}")]
    Internal(String),

    #[error(transparent)]
    IO {
        #[from]
        source: std::io::Error,
    },

    #[error(transparent)]
    TaskJoin {
        #[from]
        source: tokio::task::JoinError,
    },
}

pub type JoinResult<T> = result::Result<T, JoinError>;

impl JoinError {
    pub(crate) fn malformed_key(relation: &str, value: &str) -> Self {
        JoinError::MalformedKey {
            relation: relation.to_string(),
            value: value.to_string(),
        }
    }
}
