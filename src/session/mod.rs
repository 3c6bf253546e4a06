//! Per-account browser session registry.
//!
//! At most one live browser per account, enforced by a per-account slot lock:
//! the global map lock is only held long enough to fetch or insert the slot,
//! so a slow Chromium launch for one account never blocks the others.
//! Idle sessions are evicted by a periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::browser::{BrowserHandle, HandleProvider};
use crate::core::error::OpError;
use crate::core::types::ProxyDescriptor;

/// One live browser bound to one account.
pub struct Session<H: BrowserHandle> {
    pub account_id: String,
    pub handle: H,
    created: Instant,
    last_used: std::sync::Mutex<Instant>,
}

impl<H: BrowserHandle> Session<H> {
    fn new(account_id: String, handle: H) -> Self {
        let now = Instant::now();
        Self {
            account_id,
            handle,
            created: now,
            last_used: std::sync::Mutex::new(now),
        }
    }

    /// Mark the session as recently used so the sweep keeps it alive.
    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_used.lock() {
            *guard = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map(|g| g.elapsed())
            .unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

type Slot<H> = Mutex<Option<Arc<Session<H>>>>;

pub struct SessionRegistry<P: HandleProvider> {
    provider: P,
    slots: Mutex<HashMap<String, Arc<Slot<P::Handle>>>>,
}

impl<P: HandleProvider> SessionRegistry<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot_for(&self, account_id: &str) -> Arc<Slot<P::Handle>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return the account's live session, launching a browser if none exists.
    ///
    /// Concurrent callers for the same account serialize on the slot lock, so
    /// exactly one of them launches and the rest receive the same session.
    /// A dead handle (crashed browser) is replaced transparently.
    ///
    /// `proxy` only applies when a browser is actually launched; an existing
    /// session keeps whatever proxy it was created with.
    pub async fn acquire(
        &self,
        account_id: &str,
        proxy: Option<&ProxyDescriptor>,
    ) -> Result<Arc<Session<P::Handle>>, OpError> {
        loop {
            let slot = self.slot_for(account_id).await;
            let mut guard = slot.lock().await;

            // A release or sweep may have unlinked this slot between fetch
            // and lock; launching into an unlinked slot would leak the
            // browser, so fetch a fresh one instead.
            let linked = {
                let slots = self.slots.lock().await;
                slots
                    .get(account_id)
                    .map(|s| Arc::ptr_eq(s, &slot))
                    .unwrap_or(false)
            };
            if !linked {
                continue;
            }

            if let Some(session) = guard.as_ref() {
                if session.handle.is_alive().await {
                    session.touch();
                    return Ok(session.clone());
                }
                warn!("session for {} is dead, relaunching", account_id);
                *guard = None;
            }

            let handle = self.provider.launch(proxy).await?;
            info!("session created for {} ({})", account_id, handle.ws_url());
            let session = Arc::new(Session::new(account_id.to_string(), handle));
            *guard = Some(session.clone());
            return Ok(session);
        }
    }

    /// Current session without creating one.
    pub async fn peek(&self, account_id: &str) -> Option<Arc<Session<P::Handle>>> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(account_id).cloned()?
        };
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Close the account's browser. Idempotent; closing an absent session is
    /// a no-op that reports `false`.
    pub async fn release(&self, account_id: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(account_id).cloned()
        };
        let Some(slot) = slot else { return false };

        // Take the session under the slot lock while the slot is still in the
        // map; a racing acquire that relaunches lands in a reachable slot.
        let session = slot.lock().await.take();

        // Drop the map entry only when the slot is verifiably empty.
        {
            let mut slots = self.slots.lock().await;
            if let Some(s) = slots.get(account_id) {
                if s.try_lock().map(|g| g.is_none()).unwrap_or(false) {
                    slots.remove(account_id);
                }
            }
        }

        match session {
            Some(session) => {
                if let Err(e) = session.handle.close().await {
                    warn!("error closing browser for {}: {}", account_id, e);
                }
                info!("session closed for {}", account_id);
                true
            }
            None => false,
        }
    }

    /// Evict every session idle longer than `max_idle`. Returns the ids of
    /// evicted accounts.
    pub async fn sweep(&self, max_idle: Duration) -> Vec<String> {
        let candidates: Vec<(String, Arc<Slot<P::Handle>>)> = {
            let slots = self.slots.lock().await;
            slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut evicted = Vec::new();
        for (account_id, slot) in candidates {
            let mut guard = slot.lock().await;
            let stale = guard
                .as_ref()
                .map(|s| s.idle_for() >= max_idle)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            if let Some(session) = guard.take() {
                if let Err(e) = session.handle.close().await {
                    warn!("sweep: error closing browser for {}: {}", account_id, e);
                }
                info!(
                    "sweep: evicted idle session for {} (idle {:?})",
                    account_id,
                    session.idle_for()
                );
                evicted.push(account_id.clone());
            }
            drop(guard);
            // Remove the now-empty slot so the map does not grow unbounded.
            let mut slots = self.slots.lock().await;
            if let Some(s) = slots.get(&account_id) {
                if s.try_lock().map(|g| g.is_none()).unwrap_or(false) {
                    slots.remove(&account_id);
                }
            }
        }
        evicted
    }

    /// Close every session, used on shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = {
            let slots = self.slots.lock().await;
            slots.keys().cloned().collect()
        };
        for id in ids {
            self.release(&id).await;
        }
    }

    pub async fn live_count(&self) -> usize {
        let slots: Vec<Arc<Slot<P::Handle>>> = {
            let map = self.slots.lock().await;
            map.values().cloned().collect()
        };
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}
