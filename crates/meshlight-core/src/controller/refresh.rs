// ── Notification refresher ──
//
// Keep-alive queries while logged in during auto-connect. Runs on its own
// timer, independent of the event loop.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::model::Mode;
use crate::params::RefreshSettings;
use crate::timer::PeriodicTimer;

use super::{Bound, ControllerInner, lock};

impl ControllerInner {
    /// Start the refresher, replacing any running one.
    pub(super) fn start_refresher(self: &Arc<Self>, bound: &Bound, settings: RefreshSettings) {
        let weak = Arc::downgrade(self);
        let limit = settings.limit();
        let mut sent = 0u32;

        let timer = PeriodicTimer::new(settings.delay).spawn(&bound.runtime, &bound.cancel, move || {
            let Some(inner) = weak.upgrade() else {
                return ControlFlow::Break(());
            };
            inner.refresh_tick(&mut sent, limit)
        });

        // The replaced handle cancels its timer on drop.
        drop(lock(&self.refresher).replace(timer));
        debug!(
            delay_ms = settings.delay.as_millis(),
            repeat = settings.repeat,
            "notification refresher started"
        );
    }

    pub(super) fn stop_refresher(&self) {
        if let Some(timer) = lock(&self.refresher).take() {
            timer.cancel();
            debug!("notification refresher stopped");
        }
    }

    fn refresh_tick(&self, sent: &mut u32, limit: Option<u32>) -> ControlFlow<()> {
        {
            let state = self.lock_state();
            if !state.started || state.mode != Mode::AutoConnectMesh {
                debug!("left auto-connect, refresher ending");
                return ControlFlow::Break(());
            }
            if state.refresh_paused {
                trace!("command outstanding, keep-alive skipped");
                return ControlFlow::Continue(());
            }
        }

        let Ok(bound) = self.bound() else {
            return ControlFlow::Break(());
        };
        if !bound.link.is_logged_in() {
            return ControlFlow::Continue(());
        }

        bound.link.update_notification();
        *sent += 1;
        trace!(sent = *sent, "keep-alive sent");

        if limit.is_some_and(|max| *sent >= max) {
            debug!(sent = *sent, "refresher repeat count reached");
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
