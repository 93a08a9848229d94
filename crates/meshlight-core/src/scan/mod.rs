// ── Discovery ──
//
// Radio scanner collaborator, advertisement filters, and the intake that
// feeds the controller's scan consumer.

mod filter;
mod pipeline;

pub use filter::{AdvertiseFilter, FilterChain, FnFilter, filter_fn};
pub use pipeline::ScanListener;
pub(crate) use pipeline::{ScanIntake, ScanMessage, ScanSink};

/// Raw radio scan driver.
///
/// Results are delivered to the [`ScanListener`] installed by the
/// controller; calls on the listener may come from any thread.
pub trait Scanner: Send + Sync {
    fn set_listener(&self, listener: Option<ScanListener>);

    /// Returns `false` if the radio refused to scan.
    fn start_scan(&self) -> bool;
    fn stop_scan(&self);
    fn is_scanning(&self) -> bool;
}
