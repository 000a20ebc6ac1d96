//! Session management for the worker process.
//!
//! Each accepted connection gets its own orchestrator task; the manager
//! enforces capacity, reaps sessions past their age limit, fans out
//! shutdown, and folds per-session usage summaries into worker totals
//! reported at shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use parley_config::Settings;
use parley_core::{Transport, UsageSummary, VadModel};
use parley_pipeline::{OrchestratorConfig, SessionOrchestrator};

use crate::lifecycle::Lifecycle;
use crate::stages::build_stages;
use crate::WorkerError;

#[derive(Debug, Default)]
struct WorkerUsage {
    sessions: u64,
    speech_duration_ms: u64,
    generation_calls: u64,
    interruptions: u64,
    tokens_generated: u64,
    characters_synthesized: u64,
}

impl WorkerUsage {
    fn fold(&mut self, summary: &UsageSummary) {
        self.sessions += 1;
        self.speech_duration_ms += summary.speech_duration_ms;
        self.generation_calls += summary.generation_calls;
        self.interruptions += summary.interruptions;
        self.tokens_generated += summary.tokens_generated;
        self.characters_synthesized += summary.characters_synthesized;
    }
}

struct SessionEntry {
    handle: JoinHandle<UsageSummary>,
    /// Graceful close signal for this session only
    close_tx: watch::Sender<bool>,
    started: tokio::time::Instant,
}

pub struct SessionManager {
    settings: Settings,
    lifecycle: Arc<Lifecycle>,
    active: Arc<RwLock<HashMap<String, SessionEntry>>>,
    totals: Arc<Mutex<WorkerUsage>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(settings: Settings, lifecycle: Arc<Lifecycle>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let totals = Arc::new(Mutex::new(WorkerUsage::default()));
        let active = Arc::new(RwLock::new(HashMap::new()));

        let report = Arc::clone(&totals);
        lifecycle.on_shutdown(move || {
            let usage = report.lock();
            tracing::info!(
                sessions = usage.sessions,
                speech_duration_ms = usage.speech_duration_ms,
                generation_calls = usage.generation_calls,
                interruptions = usage.interruptions,
                tokens_generated = usage.tokens_generated,
                characters_synthesized = usage.characters_synthesized,
                "worker usage totals"
            );
        });

        start_reaper(
            Arc::clone(&active),
            shutdown_tx.subscribe(),
            settings.worker.session_timeout_secs,
        );

        Self {
            settings,
            lifecycle,
            active,
            totals,
            shutdown_tx,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Accept one connection: wire stages, connect the transport within
    /// the handshake deadline, and run the session to completion in its
    /// own task. Returns the new session id.
    pub async fn open(&self, transport: &dyn Transport) -> Result<String, WorkerError> {
        let max = self.settings.worker.max_sessions;
        if self.active.read().len() >= max {
            return Err(WorkerError::Capacity(max));
        }

        let vad: Arc<dyn VadModel> = self.lifecycle.prewarm(&self.settings.provider)?;
        let stages = build_stages(&self.settings.provider, vad)?;
        let orchestrator = SessionOrchestrator::new(
            stages,
            self.settings.provider.clone(),
            OrchestratorConfig::default(),
        )?;
        let id = orchestrator.session().id.clone();

        let handshake_ms = self.settings.worker.handshake_timeout_ms;
        let (source, sink) = timeout(
            Duration::from_millis(handshake_ms),
            transport.connect(&self.settings.worker.room),
        )
        .await
        .map_err(|_| WorkerError::HandshakeTimeout(handshake_ms))?
        .map_err(WorkerError::Core)?;

        let (close_tx, close_rx) = watch::channel(false);
        let active = Arc::clone(&self.active);
        let totals = Arc::clone(&self.totals);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let (summary, session) = orchestrator.run(source, sink, close_rx).await;
            tracing::info!(
                session_id = %summary.session_id,
                utterances = session.history().len(),
                session_duration_ms = summary.session_duration_ms,
                speech_duration_ms = summary.speech_duration_ms,
                generation_calls = summary.generation_calls,
                interruptions = summary.interruptions,
                tokens_generated = summary.tokens_generated,
                characters_synthesized = summary.characters_synthesized,
                time_to_first_token_ms = ?summary.time_to_first_token_ms,
                "session usage summary"
            );
            totals.lock().fold(&summary);
            active.write().remove(&task_id);
            summary
        });
        self.active.write().insert(
            id.clone(),
            SessionEntry {
                handle: task,
                close_tx,
                started: tokio::time::Instant::now(),
            },
        );

        tracing::info!(session_id = %id, active = self.active_count(), "session accepted");
        Ok(id)
    }

    /// Signal every session to close, wait for them to wind down, then
    /// run lifecycle shutdown hooks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let entries: Vec<(String, SessionEntry)> = self.active.write().drain().collect();
        for (id, entry) in entries {
            let _ = entry.close_tx.send(true);
            match timeout(Duration::from_secs(5), entry.handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    tracing::warn!(session_id = %id, error = %err, "session task failed");
                }
                Err(_) => {
                    tracing::warn!(session_id = %id, "session did not stop in time");
                }
            }
        }

        self.lifecycle.shutdown();
    }
}

/// Periodically close sessions that outlive the configured age limit.
/// Expired sessions shut down gracefully, so they still report a usage
/// summary and remove themselves from the registry.
fn start_reaper(
    active: Arc<RwLock<HashMap<String, SessionEntry>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    timeout_secs: u64,
) {
    tokio::spawn(async move {
        let deadline = Duration::from_secs(timeout_secs);
        let mut ticker = tokio::time::interval(Duration::from_secs(timeout_secs.clamp(1, 60)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired: Vec<String> = active
                        .read()
                        .iter()
                        .filter(|(_, entry)| entry.started.elapsed() >= deadline)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in expired {
                        tracing::warn!(session_id = %id, timeout_secs, "session exceeded age limit, closing");
                        if let Some(entry) = active.read().get(&id) {
                            let _ = entry.close_tx.send(true);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
