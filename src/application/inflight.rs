//! In-flight tracking for per-URL materialization and invalidation runs.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;

use crate::domain::source::SourceUrl;

/// Source URLs that currently have a materialize or invalidate run admitted.
///
/// Identity is a 64-bit digest of the URL alone: every preset of a URL is
/// processed as one guarded unit.
#[derive(Default, Clone)]
pub struct InFlight {
    urls: Arc<DashMap<u64, ()>>,
}

#[derive(Debug, Error)]
pub enum InFlightError {
    #[error("url is being processed")]
    AlreadyProcessing { url: String },
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            urls: Arc::new(DashMap::new()),
        }
    }

    /// Mark `source` as in flight. The mark is cleared when the returned
    /// guard is dropped, including during unwinding.
    pub fn try_acquire(&self, source: &SourceUrl) -> Result<InFlightGuard, InFlightError> {
        use dashmap::mapref::entry::Entry;

        let id = url_identity(source);
        match self.urls.entry(id) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(InFlightGuard {
                    id,
                    urls: Arc::clone(&self.urls),
                })
            }
            Entry::Occupied(_) => {
                counter!("derivo_inflight_rejected_total").increment(1);
                Err(InFlightError::AlreadyProcessing {
                    url: source.to_string(),
                })
            }
        }
    }

    pub fn is_in_flight(&self, source: &SourceUrl) -> bool {
        self.urls.contains_key(&url_identity(source))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

pub struct InFlightGuard {
    id: u64,
    urls: Arc<DashMap<u64, ()>>,
}

impl InFlightGuard {
    /// Clear the mark now instead of at end of scope.
    pub fn release(self) {}
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.urls.remove(&self.id);
    }
}

fn url_identity(source: &SourceUrl) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.as_str().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    fn source(raw: &str) -> SourceUrl {
        SourceUrl::parse(raw).expect("valid url")
    }

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let inflight = InFlight::new();
        let url = source("https://x/a.jpg");

        let guard = inflight.try_acquire(&url).expect("first acquire");
        assert!(inflight.is_in_flight(&url));
        assert!(matches!(
            inflight.try_acquire(&url),
            Err(InFlightError::AlreadyProcessing { .. })
        ));

        guard.release();
        assert!(!inflight.is_in_flight(&url));
        assert!(inflight.try_acquire(&url).is_ok());
        assert!(inflight.is_empty());
    }

    #[test]
    fn distinct_urls_do_not_block_each_other() {
        let inflight = InFlight::new();
        let _a = inflight.try_acquire(&source("https://x/a.jpg")).expect("a");
        let _b = inflight.try_acquire(&source("https://x/b.jpg")).expect("b");
        assert_eq!(inflight.len(), 2);
    }

    #[test]
    fn guard_is_released_on_panic() {
        let inflight = InFlight::new();
        let url = source("https://x/a.jpg");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = inflight.try_acquire(&url).expect("acquire");
            panic!("materialization blew up");
        }));

        assert!(result.is_err());
        assert!(!inflight.is_in_flight(&url));
    }

    #[test]
    fn racing_threads_admit_exactly_one() {
        const RACERS: usize = 8;

        let inflight = InFlight::new();
        let url = source("https://x/a.jpg");
        let barrier = Barrier::new(RACERS);

        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..RACERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        // Keep the guard alive until every racer has tried.
                        let guard = inflight.try_acquire(&url).ok();
                        barrier.wait();
                        guard.is_some()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("racer thread"))
                .filter(|admitted| *admitted)
                .count()
        });

        assert_eq!(admitted, 1);
        assert!(inflight.is_empty());
    }
}
