/*
Copyright 2026 The Readout Card Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use std::thread::current;

use log::{Level, LevelFilter, Log, Metadata, Record, set_logger, set_max_level};

pub static LOGGER: SimpleLogger = SimpleLogger {};
static INIT: Once = Once::new();

/// Records emitted under this target prefix are captured.
pub const CAPTURED_TARGET: &str = "readout_card";

/// A record seen by [`SimpleLogger`]. `args` holds the rendered message,
/// which for forwarded `tracing` events ends with the `key=value` fields.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LogCall {
    pub level: Level,
    pub args: String,
    pub target: String,
}

static CAPTURED: Mutex<Vec<LogCall>> = Mutex::new(Vec::new());

// A test that panics while holding the lock must not hide the records from
// the tests that follow it.
fn captured() -> MutexGuard<'static, Vec<LogCall>> {
    CAPTURED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects every `readout_card` record in a process-wide list.
///
/// Tests run in parallel and share the list, so assertions should look for
/// the records they expect rather than count them.
pub struct SimpleLogger {}

impl SimpleLogger {
    pub fn initialize_test_logger() {
        INIT.call_once(|| {
            set_logger(&LOGGER).unwrap();
            set_max_level(LevelFilter::Trace);
        });
    }

    /// Captured calls at `level` whose message contains `needle`.
    pub fn find_log_calls(&self, level: Level, needle: &str) -> Vec<LogCall> {
        captured()
            .iter()
            .filter(|call| call.level == level && call.args.contains(needle))
            .cloned()
            .collect()
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // tracing forwards events through its `log` feature with the
        // emitting module path as target
        metadata.target().starts_with(CAPTURED_TARGET) && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let call = LogCall {
            level: record.level(),
            args: record.args().to_string(),
            target: record.target().to_owned(),
        };
        println!("[{:?}] {} {}: {}", current().id(), call.level, call.target, call.args);
        captured().push(call);
    }

    fn flush(&self) {}
}

