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

use std::time::{Duration, Instant};

use log::debug;

#[cfg(feature = "tracing")]
use once_cell::sync::Lazy;

#[cfg(feature = "tracing")]
static RECORDER: Lazy<Recorder> = Lazy::new(Recorder::new);

/// Writes chrome trace events (`chrome://tracing`) to stdout.
#[cfg(feature = "tracing")]
struct Recorder {
    origin: Instant,
}

#[cfg(feature = "tracing")]
impl Recorder {
    fn new() -> Self {
        // Open the JSON array. The viewer does not require the closing ']'.
        print!("[ ");
        Self {
            origin: Instant::now(),
        }
    }

    fn event(&self, name: &str, ph: &str) {
        println!(
            "{{ \"name\": \"{name}\", \"cat\": \"JOIN\", \"ph\": \"{ph}\", \"pid\": 1, \"tid\": \"{:?}\", \"ts\": {} }},",
            std::thread::current().id(),
            self.origin.elapsed().as_micros()
        );
    }
}

#[allow(unused_variables)]
fn trace_begin(name: &str) {
    #[cfg(feature = "tracing")]
    RECORDER.event(name, "B");
}

#[allow(unused_variables)]
fn trace_end(name: &str) {
    #[cfg(feature = "tracing")]
    RECORDER.event(name, "E");
}

/// Times one phase of a join. Dropping the guard closes the phase.
pub(crate) struct PhaseGuard<'a> {
    label: &'a str,
    start: Instant,
}

impl<'a> PhaseGuard<'a> {
    pub(crate) fn new(label: &'a str) -> Self {
        trace_begin(label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        trace_end(self.label);
        debug!("{} took {:?}", self.label, self.start.elapsed());
    }
}
