// ── Periodic timer ──
//
// Cancellable repeating task. The tick closure runs synchronously on the
// runtime and decides whether the timer keeps going.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// tokio intervals reject a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Schedule for a repeating task. The first tick fires one period after
/// spawning.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    period: Duration,
}

impl PeriodicTimer {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the timer on `runtime`. The timer stops when `tick` breaks,
    /// when the returned handle is cancelled or dropped, or when `parent`
    /// is cancelled.
    pub fn spawn<F>(self, runtime: &Handle, parent: &CancellationToken, mut tick: F) -> TimerHandle
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let period = self.period.max(MIN_PERIOD);

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tick().is_break() {
                            break;
                        }
                    }
                }
            }
        });

        TimerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owner of a running [`PeriodicTimer`]. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// `true` once the task has exited, for any reason.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
