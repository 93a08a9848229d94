// ── Advertisement filters ──
//
// Caller-supplied decoders that turn a raw discovery record into a
// `Peripheral`. The chain is ordered; the first filter that yields a
// peripheral wins.

use std::fmt;

use tracing::warn;

use crate::error::FilterError;
use crate::model::{Peripheral, RawAdvertisement};

/// Decodes a raw advertisement into a peripheral, or declines it.
pub trait AdvertiseFilter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// `Ok(None)` declines the record; errors are logged and the next
    /// filter is tried.
    fn filter(&self, raw: &RawAdvertisement) -> Result<Option<Peripheral>, FilterError>;
}

type FilterFn = dyn Fn(&RawAdvertisement) -> Result<Option<Peripheral>, FilterError> + Send + Sync;

/// Closure-backed filter, see [`filter_fn`].
pub struct FnFilter {
    name: String,
    f: Box<FilterFn>,
}

impl AdvertiseFilter for FnFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, raw: &RawAdvertisement) -> Result<Option<Peripheral>, FilterError> {
        (self.f)(raw)
    }
}

/// Wrap a closure as a named [`AdvertiseFilter`].
pub fn filter_fn<F>(name: impl Into<String>, f: F) -> FnFilter
where
    F: Fn(&RawAdvertisement) -> Result<Option<Peripheral>, FilterError> + Send + Sync + 'static,
{
    FnFilter {
        name: name.into(),
        f: Box::new(f),
    }
}

/// Ordered set of advertisement filters.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn AdvertiseFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl AdvertiseFilter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: impl AdvertiseFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run `raw` through the chain.
    pub fn apply(&self, raw: &RawAdvertisement) -> Option<Peripheral> {
        for filter in &self.filters {
            match filter.filter(raw) {
                Ok(Some(peripheral)) => return Some(peripheral),
                Ok(None) => {}
                Err(e) => {
                    warn!(filter = filter.name(), address = %raw.address, error = %e, "advertisement filter failed");
                }
            }
        }
        None
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}
