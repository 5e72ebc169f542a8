use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-client cap on simultaneously running streams.
///
/// Entries exist only while a client has at least one stream in flight, so the
/// map never grows beyond the set of currently active identities.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Mutex<HashMap<String, usize>>>,
    max_per_client: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_per_client: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_per_client,
        }
    }

    pub fn max_per_client(&self) -> usize {
        self.max_per_client
    }

    /// Take a slot for `identity`, or `None` if it is already at the ceiling.
    /// A rejected call leaves the counts untouched.
    pub fn try_acquire(&self, identity: &str) -> Option<SlotGuard> {
        let mut counts = self.lock();
        let current = counts.get(identity).copied().unwrap_or(0);
        if current >= self.max_per_client {
            return None;
        }
        counts.insert(identity.to_string(), current + 1);
        drop(counts);

        Some(SlotGuard {
            limiter: self.clone(),
            identity: identity.to_string(),
        })
    }

    /// Give back one slot. Usually called by [`SlotGuard`]'s drop.
    pub fn release(&self, identity: &str) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(identity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(identity);
            }
        }
    }

    /// Streams currently held by `identity`.
    pub fn active(&self, identity: &str) -> usize {
        self.lock().get(identity).copied().unwrap_or(0)
    }

    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        // Counts stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted stream. Releases its slot exactly once, when dropped.
pub struct SlotGuard {
    limiter: ConcurrencyLimiter,
    identity: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.limiter.release(&self.identity);
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("identity", &self.identity)
            .finish()
    }
}
