//! Request/reply correlation.
//!
//! Each layer that waits for replies owns a [`CorrelationRegistry`]. An
//! entry pairs a handle with a completion and an optional deadline; the
//! deadline is the per-entry timer, checked by the owning layer in
//! `handle_timeout` and dropped together with the entry.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::{Error, Result};

/// Completion half handed to the caller's pending request.
pub type Responder<T> = oneshot::Sender<Result<T>>;

/// Something that can be finished with a reply or a failure.
pub trait Completion {
    /// Consume the completion with the request's outcome.
    fn complete(self, result: Result<Bytes>);
}

impl Completion for Responder<Bytes> {
    fn complete(self, result: Result<Bytes>) {
        // Caller may have stopped waiting.
        let _ = self.send(result);
    }
}

/// Send an outcome to a responder, ignoring a caller that went away.
pub fn respond<T>(responder: Responder<T>, result: Result<T>) {
    let _ = responder.send(result);
}

#[derive(Debug)]
struct Entry<C> {
    completion: C,
    deadline: Option<Instant>,
}

/// Live correlation entries keyed by handle.
///
/// A handle maps to at most one live entry; resolving, expiring or draining
/// removes it, so every completion fires once.
#[derive(Debug)]
pub struct CorrelationRegistry<K, C> {
    entries: HashMap<K, Entry<C>>,
}

impl<K, C> Default for CorrelationRegistry<K, C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, C> CorrelationRegistry<K, C>
where
    K: Eq + Hash + Copy + Debug,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a reply for `key`.
    ///
    /// With a timeout the entry carries a deadline after which
    /// [`expire`](Self::expire) removes it. If `key` was already live the
    /// displaced completion is returned so the caller can reject it.
    pub fn request_context(
        &mut self,
        key: K,
        completion: C,
        timeout: Option<Duration>,
    ) -> Option<C> {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.entries
            .insert(
                key,
                Entry {
                    completion,
                    deadline,
                },
            )
            .map(|old| old.completion)
    }

    /// Remove and return the completion for `key`.
    ///
    /// `None` means the reply is stale: already resolved, expired, or never
    /// registered.
    pub fn resolve_context(&mut self, key: &K) -> Option<C> {
        self.entries.remove(key).map(|entry| entry.completion)
    }

    /// Check if `key` has a live entry.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest deadline among live entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.deadline).min()
    }

    /// Remove every entry whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(K, C)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline.is_some_and(|d| d <= now))
            .map(|(k, _)| *k)
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e.completion)))
            .collect()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<(K, C)> {
        self.entries
            .drain()
            .map(|(k, e)| (k, e.completion))
            .collect()
    }
}

impl<K, C> CorrelationRegistry<K, C>
where
    K: Eq + Hash + Copy + Debug,
    C: Completion,
{
    /// Reject every expired entry with a timeout.
    ///
    /// Returns how many entries expired.
    pub fn expire_with_timeout(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired = self.expire(now);
        let count = expired.len();
        for (key, completion) in expired {
            tracing::debug!(?key, ?timeout, "request timed out");
            completion.complete(Err(Error::Timeout(timeout)));
        }
        count
    }

    /// Reject every live entry with `error`.
    pub fn fail_all(&mut self, error: &Error) {
        for (_, completion) in self.drain() {
            completion.complete(Err(error.clone()));
        }
    }
}
