use std::sync::Arc;

use tracing::{debug, trace};

use appsec_core::{AppsecError, Result, Value};

use crate::action::{Action, ActionTable, ActionType};
use crate::detector::{Detector, Listener};
use crate::event::Event;
use crate::telemetry::{Meta, Metrics};

use super::rate_limiter::RateLimiter;

/// One evaluation session bound to a single engine generation.
///
/// Listeners are created lazily on first dispatch and kept for the life of
/// the context, so repeated `publish` calls share per-request state.
/// A context is meant for one request and is not `Sync`.
pub struct Context {
    detectors: Arc<Vec<Arc<dyn Detector>>>,
    listeners: Vec<Option<Box<dyn Listener>>>,
    actions: Arc<ActionTable>,
    limiter: Arc<RateLimiter>,
}

impl Context {
    pub(crate) fn new(
        detectors: Arc<Vec<Arc<dyn Detector>>>,
        actions: Arc<ActionTable>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let listeners = detectors.iter().map(|_| None).collect();
        Self {
            detectors,
            listeners,
            actions,
            limiter,
        }
    }

    /// Fan `data` out to every subscribed detector in registration order.
    ///
    /// Returns `Ok(None)` when nothing matched. A detector is skipped when
    /// none of its subscriptions appear among the top-level keys of `data`.
    /// A root that is not a map fails with `InvalidObject` once any detector
    /// is registered.
    /// Listener errors abort the call, except timeouts, which count as
    /// "found nothing" for that detector.
    pub fn publish(&mut self, data: &Value) -> Result<Option<Event>> {
        if self.detectors.is_empty() {
            return Ok(None);
        }
        if !data.is_map() {
            return Err(AppsecError::invalid_object(format!(
                "expected a map at the root, got {}",
                data.kind()
            )));
        }

        let view = data.view();
        let mut event = Event::new();

        for (detector, slot) in self.detectors.iter().zip(self.listeners.iter_mut()) {
            let subscriptions = detector.subscriptions();
            if !view.keys().any(|key| subscriptions.contains(key)) {
                trace!(detector = %detector.name(), "no subscribed address present, skipping");
                continue;
            }

            let listener = slot.get_or_insert_with(|| detector.listener());
            match listener.call(view, &mut event) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    debug!(detector = %detector.name(), error = %e, "listener timed out");
                }
                Err(e) => return Err(e),
            }
        }

        if event.is_empty() {
            return Ok(None);
        }
        add_record_action(&mut event);

        for action in &mut event.actions {
            self.actions.resolve(action);
        }
        event.force_keep = self.limiter.allow();

        Ok(Some(event))
    }

    /// Collect diagnostics from every listener this context has used.
    pub fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics) {
        for listener in self.listeners.iter().flatten() {
            listener.get_meta_and_metrics(meta, metrics);
        }
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }
}

/// Matches with no verdict still need to be recorded, and a stack trace
/// alone does not produce an event without one.
fn add_record_action(event: &mut Event) {
    let has_verdict = event.actions.iter().any(|a| {
        matches!(
            a.action_type,
            ActionType::Block | ActionType::Redirect | ActionType::Record
        )
    });
    if has_verdict {
        return;
    }
    let matched_silently = event.actions.is_empty() && !event.triggers.is_empty();
    if matched_silently || event.has_action(ActionType::StackTrace) {
        event.actions.push(Action::new(ActionType::Record));
    }
}
