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

use std::sync::Once;
use std::time::{Duration, Instant};

use metrics_macro::NamedMetric;

use crate::link::LinkId;

#[macro_use]
mod metrics_macro;

static LABEL_LINK: &str = "link";
static LABEL_TRANSITION: &str = "transition";

define_metrics! {
    CounterMetric {
        SuperpagesPushed { link: LinkId } => {
            name: "superpages_pushed_total",
            description: "Number of superpage descriptors handed to the card",
            unit: metrics::Unit::Count,
        },
        SuperpagesReady { link: LinkId, count: u64 } => {
            name: "superpages_ready_total",
            description: "Number of completed superpages moved to the ready queue",
            unit: metrics::Unit::Count,
        },
        ProtocolViolations { link: LinkId } => {
            name: "protocol_violations_total",
            description: "Number of times the card reported more completions than were outstanding",
            unit: metrics::Unit::Count,
        },
    }
    HistogramMetric {
        TransitionDuration { transition: &'static str, duration: Duration } => {
            name: "channel_transition_duration_seconds",
            description: "Duration of channel start, stop and reset, including settling delays",
            unit: metrics::Unit::Seconds,
        },
    }
}

impl HistogramMetric {
    /// Runs `f` and records how long it took as a lifecycle transition
    pub(crate) fn time_and_emit_transition<T, F: FnOnce() -> T>(
        transition: &'static str,
        f: F,
    ) -> T {
        let start = Instant::now();
        let result = f();
        HistogramMetric::TransitionDuration {
            transition,
            duration: start.elapsed(),
        }
        .emit();
        result
    }
}

/// A metric which can be emitted to the installed recorder
pub(crate) trait EmittableMetric {
    /// Emits the metric. The first emission of a variant also describes it.
    fn emit(self);
}

impl EmittableMetric for CounterMetric {
    fn emit(self) {
        let name = self.name();
        let unit = self.unit();
        let description = self.description();

        match self {
            CounterMetric::SuperpagesPushed { link } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });

                metrics::counter!(name, LABEL_LINK => link.to_string()).increment(1);
            }
            CounterMetric::SuperpagesReady { link, count } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });

                metrics::counter!(name, LABEL_LINK => link.to_string()).increment(count);
            }
            CounterMetric::ProtocolViolations { link } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_counter!(name, unit, description);
                });

                metrics::counter!(name, LABEL_LINK => link.to_string()).increment(1);
            }
        }
    }
}

impl EmittableMetric for HistogramMetric {
    fn emit(self) {
        let name = self.name();
        let unit = self.unit();
        let description = self.description();

        match self {
            HistogramMetric::TransitionDuration {
                transition,
                duration,
            } => {
                static DESCRIBE: Once = Once::new();
                DESCRIBE.call_once(|| {
                    metrics::describe_histogram!(name, unit, description);
                });

                metrics::histogram!(name, LABEL_TRANSITION => transition).record(duration);
            }
        }
    }
}
