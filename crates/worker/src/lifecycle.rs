//! Process lifecycle: prewarm before any session, shutdown hooks after
//! the last one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use parley_config::ProviderConfig;
use parley_core::{Error, Result};
use parley_pipeline::{EnergyVadModel, SessionOrchestrator};

type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Owns state that outlives individual sessions.
///
/// `prewarm` is idempotent: the first call loads the shared VAD model,
/// later calls return the cached instance. Shutdown hooks run exactly
/// once, in registration order, no matter how often `shutdown` is called.
#[derive(Default)]
pub struct Lifecycle {
    vad_model: OnceCell<Arc<EnergyVadModel>>,
    hooks: Mutex<Vec<ShutdownHook>>,
    fired: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state-heavy resources. A failure here is fatal: the worker
    /// must not accept sessions with a missing model.
    pub fn prewarm(&self, config: &ProviderConfig) -> Result<Arc<EnergyVadModel>> {
        self.vad_model
            .get_or_try_init(|| {
                tracing::info!("prewarming shared models");
                SessionOrchestrator::prewarm(config)
                    .map_err(|e| Error::Prewarm(e.to_string()))
            })
            .cloned()
    }

    /// The prewarmed model, if `prewarm` has succeeded.
    pub fn vad_model(&self) -> Option<Arc<EnergyVadModel>> {
        self.vad_model.get().cloned()
    }

    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push(Box::new(hook));
    }

    pub fn shutdown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks: Vec<ShutdownHook> = self.hooks.lock().drain(..).collect();
        tracing::info!(hooks = hooks.len(), "running shutdown hooks");
        for hook in hooks {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_prewarm_is_idempotent() {
        let lifecycle = Lifecycle::new();
        let config = ProviderConfig::default();

        let first = lifecycle.prewarm(&config).unwrap();
        let second = lifecycle.prewarm(&config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(lifecycle.vad_model().is_some());
    }

    #[test]
    fn test_prewarm_failure_is_fatal() {
        let lifecycle = Lifecycle::new();
        let mut config = ProviderConfig::default();
        config.vad.threshold_db = 5.0;

        let err = lifecycle.prewarm(&config).unwrap_err();
        assert!(matches!(err, Error::Prewarm(_)));
        assert!(lifecycle.vad_model().is_none());
    }

    #[test]
    fn test_shutdown_hooks_run_once_in_order() {
        let lifecycle = Lifecycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let order = Arc::clone(&order);
            let count = Arc::clone(&count);
            lifecycle.on_shutdown(move || {
                order.lock().push(i);
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        lifecycle.shutdown();
        lifecycle.shutdown();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
