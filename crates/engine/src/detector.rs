//! Detector and Listener traits: the seam between the engine and any
//! concrete detection logic.

use std::collections::BTreeSet;
use std::sync::Arc;

use appsec_core::{Result, Value, ValueView};

use crate::event::Event;
use crate::telemetry::{Meta, Metrics};

/// Per-context evaluation handle produced by a [`Detector`].
///
/// A listener lives as long as the context that created it, so any state it
/// keeps is scoped to one request.
pub trait Listener: Send {
    /// Inspect `data` and append matches/actions to `event`.
    ///
    /// Fails with `InvalidObject` when `data` is not a map and with
    /// `Timeout` when the evaluation budget runs out; in both cases nothing
    /// is appended.
    fn call(&mut self, data: ValueView<'_>, event: &mut Event) -> Result<()>;

    /// Post-call diagnostics (durations, ruleset version).
    fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics);
}

/// A pluggable unit of detection logic.
///
/// Detectors are immutable once built: [`Detector::update`] returns a new
/// instance and leaves `self` untouched, so contexts holding the previous
/// generation keep a consistent view.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Input addresses this detector reads.
    fn subscriptions(&self) -> &BTreeSet<String>;

    fn listener(&self) -> Box<dyn Listener>;

    /// Derive a new detector from a merged configuration document and write
    /// version/error/loaded-count telemetry into `meta`/`metrics`.
    fn update(&self, config: &Value, meta: &mut Meta, metrics: &mut Metrics)
        -> Result<Arc<dyn Detector>>;
}
