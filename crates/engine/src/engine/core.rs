//! Core [`Engine`] struct: detector generations and configuration updates.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use appsec_core::config::DEFAULT_TRACE_RATE_LIMIT;
use appsec_core::{EngineSettings, Value};

use crate::action::ActionTable;
use crate::detector::Detector;
use crate::telemetry::{Meta, Metrics};

use super::context::Context;
use super::rate_limiter::RateLimiter;

type Generation = Vec<Arc<dyn Detector>>;

/// Owns the live, ordered detector collection.
///
/// Registration order is dispatch order. Every [`Engine::update`] produces a
/// new generation; contexts created earlier keep the generation they were
/// created from.
pub struct Engine {
    detectors: ArcSwap<Generation>,
    actions: ArcSwap<ActionTable>,
    limiter: Arc<RateLimiter>,
    generation: AtomicU64,
    /// Serializes writers (`subscribe`/`update`); readers never take it.
    writer: Mutex<()>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_RATE_LIMIT)
    }
}

impl Engine {
    /// Create an empty engine. `trace_rate_limit` caps force-kept events
    /// per second (0 = keep all).
    pub fn new(trace_rate_limit: u32) -> Self {
        Self {
            detectors: ArcSwap::from_pointee(Vec::new()),
            actions: ArcSwap::from_pointee(ActionTable::builtin()),
            limiter: Arc::new(RateLimiter::new(trace_rate_limit)),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.trace_rate_limit)
    }

    /// Append a detector to the live collection.
    pub fn subscribe(&self, detector: Arc<dyn Detector>) {
        let _guard = self.writer.lock();
        let mut next: Generation = self.detectors.load().iter().cloned().collect();
        info!(detector = %detector.name(), position = next.len(), "detector subscribed");
        next.push(detector);
        self.detectors.store(Arc::new(next));
    }

    /// Snapshot the current generation into a new per-request context.
    pub fn get_context(&self) -> Context {
        Context::new(
            self.detectors.load_full(),
            self.actions.load_full(),
            Arc::clone(&self.limiter),
        )
    }

    /// Re-derive every detector from `config` and install the result as the
    /// next generation.
    ///
    /// A detector whose update fails is carried over unchanged; the others
    /// are still updated. The action table is rebuilt from the `actions` key,
    /// unless every detector rejected `config`, in which case the carried-over
    /// detectors keep resolving against the previous table.
    pub fn update(&self, config: &Value, meta: &mut Meta, metrics: &mut Metrics) {
        let _guard = self.writer.lock();
        let current = self.detectors.load_full();

        let mut next: Generation = Vec::with_capacity(current.len());
        let mut failed = 0usize;
        for detector in current.iter() {
            match detector.update(config, meta, metrics) {
                Ok(updated) => {
                    debug!(detector = %detector.name(), "detector updated");
                    next.push(updated);
                }
                Err(e) => {
                    warn!(detector = %detector.name(), error = %e, "detector update failed, keeping previous instance");
                    failed += 1;
                    next.push(Arc::clone(detector));
                }
            }
        }

        if current.is_empty() || failed < current.len() {
            let actions = config.get("actions").map(Value::to_json);
            self.actions
                .store(Arc::new(ActionTable::from_config(actions.as_ref())));
        } else {
            warn!(failed, "every detector rejected the update, keeping previous action table");
        }
        self.detectors.store(Arc::new(next));

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            generation,
            detectors = current.len(),
            failed,
            "engine generation installed"
        );
    }

    /// Number of completed updates.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.detectors
            .load()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Union of every detector's subscriptions.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.detectors
            .load()
            .iter()
            .flat_map(|d| d.subscriptions().iter().cloned())
            .collect()
    }

    pub fn action_table(&self) -> Arc<ActionTable> {
        self.actions.load_full()
    }

    pub fn rate_limit(&self) -> u32 {
        self.limiter.max_per_second()
    }
}
