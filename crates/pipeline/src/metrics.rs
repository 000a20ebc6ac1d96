//! Per-session metrics collection.
//!
//! Stages hand events to a cloned [`MetricsHandle`]; dispatch is a
//! buffered channel send and never blocks the producing stage. A drain
//! task folds events into the usage aggregate, logs each one at debug
//! level, and mirrors the headline numbers onto the `metrics` facade for
//! whatever recorder the host process installed.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_core::{MetricEvent, StageKind, UsageSummary};

#[derive(Debug, Default)]
struct UsageAggregate {
    speech_duration_ms: u64,
    generation_calls: u64,
    interruptions: u64,
    tokens_generated: u64,
    characters_synthesized: u64,
    ttft_total_ms: u64,
    ttft_samples: u64,
}

impl UsageAggregate {
    fn apply(&mut self, event: &MetricEvent) {
        let value = event.value.max(0.0);
        match (event.stage, event.name.as_str()) {
            (StageKind::Vad, "speech_duration_ms") => {
                self.speech_duration_ms += value as u64;
            }
            (StageKind::Generator, "generation_call") => {
                self.generation_calls += value as u64;
            }
            (StageKind::Generator, "tokens_generated") => {
                self.tokens_generated += value as u64;
            }
            (StageKind::Generator, "ttft_ms") => {
                self.ttft_total_ms += value as u64;
                self.ttft_samples += 1;
            }
            (StageKind::Synthesizer, "characters_synthesized") => {
                self.characters_synthesized += value as u64;
            }
            (StageKind::Orchestrator, "interruption") => {
                self.interruptions += value as u64;
            }
            _ => {}
        }
    }
}

/// Cloneable, non-blocking event entry point handed to stages.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<MetricEvent>,
}

impl MetricsHandle {
    /// Record one event. Never blocks; events arriving after collection
    /// has shut down are dropped.
    pub fn record(&self, event: MetricEvent) {
        let _ = self.tx.send(event);
    }
}

/// Aggregates one session's metric events into a [`UsageSummary`].
pub struct MetricsCollector {
    session_id: String,
    started: Instant,
    tx: mpsc::UnboundedSender<MetricEvent>,
    aggregate: Arc<Mutex<UsageAggregate>>,
    drain: JoinHandle<()>,
}

impl MetricsCollector {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<MetricEvent>();
        let aggregate = Arc::new(Mutex::new(UsageAggregate::default()));

        let drain_aggregate = Arc::clone(&aggregate);
        let drain_session = session_id.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::debug!(
                    session_id = %drain_session,
                    stage = %event.stage,
                    name = %event.name,
                    value = event.value,
                    "metric event"
                );
                counter!("parley_metric_events_total").increment(1);
                if event.name == "ttft_ms" {
                    histogram!("parley_generator_ttft_ms").record(event.value);
                }
                drain_aggregate.lock().apply(&event);
            }
        });

        Self {
            session_id,
            started: Instant::now(),
            tx,
            aggregate,
            drain,
        }
    }

    /// A handle for stages to report through.
    pub fn handle(&self) -> MetricsHandle {
        MetricsHandle {
            tx: self.tx.clone(),
        }
    }

    /// Close ingestion, wait for buffered events to drain, and produce
    /// the summary. Callable exactly once; always returns a summary.
    pub async fn finish(self) -> UsageSummary {
        let Self {
            session_id,
            started,
            tx,
            aggregate,
            drain,
        } = self;
        drop(tx);
        // Stage tasks may still hold handles; the channel only closes once
        // every sender drops. Bound the wait so shutdown cannot hang on a
        // stuck stage.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(250), drain).await;

        let agg = aggregate.lock();
        UsageSummary {
            session_id,
            session_duration_ms: started.elapsed().as_millis() as u64,
            speech_duration_ms: agg.speech_duration_ms,
            generation_calls: agg.generation_calls,
            interruptions: agg.interruptions,
            tokens_generated: agg.tokens_generated,
            characters_synthesized: agg.characters_synthesized,
            time_to_first_token_ms: if agg.ttft_samples > 0 {
                Some(agg.ttft_total_ms / agg.ttft_samples)
            } else {
                None
            },
        }
    }
}
