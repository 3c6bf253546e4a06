//! Human-escalation coordination.
//!
//! When automated page-driving hits a CAPTCHA it cannot pass, the blocked
//! operation submits the challenge here and suspends. An operator answers via
//! the control surface; the answer is delivered over a single-slot
//! [`oneshot`] rendezvous — one producer (the operator) and one consumer (the
//! blocked operation) per challenge id, which keeps the resolve-vs-timeout
//! race trivial: whichever side removes the pending entry under the map lock
//! wins, and the loser observes "no such pending challenge".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::core::error::OpError;

/// Operator-facing view of a pending challenge.
#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub id: String,
    pub account_id: String,
    /// Base64-encoded PNG of the challenge surface.
    pub image: String,
    pub created_at: DateTime<Utc>,
}

struct PendingEntry {
    meta: Challenge,
    tx: oneshot::Sender<String>,
    /// Taken by the (single) waiter; `None` once a wait is in flight.
    rx: Option<oneshot::Receiver<String>>,
}

#[derive(Default)]
pub struct EscalationQueue {
    pending: Mutex<HashMap<String, PendingEntry>>,
    seq: AtomicU64,
}

impl EscalationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new pending challenge and return its id. Non-blocking; the
    /// caller suspends separately via [`Self::wait`].
    pub async fn submit(&self, account_id: &str, image_png: &[u8]) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "challenge_{}_{}_{}",
            account_id,
            Utc::now().timestamp_millis(),
            seq
        );
        let (tx, rx) = oneshot::channel();
        let meta = Challenge {
            id: id.clone(),
            account_id: account_id.to_string(),
            image: base64::engine::general_purpose::STANDARD.encode(image_png),
            created_at: Utc::now(),
        };
        self.pending.lock().await.insert(
            id.clone(),
            PendingEntry {
                meta,
                tx,
                rx: Some(rx),
            },
        );
        info!(challenge = %id, account = %account_id, "challenge escalated to operator");
        id
    }

    /// Suspend until the operator answers or `timeout` elapses.
    ///
    /// Exactly one terminal state per challenge: on success the entry was
    /// already removed by [`Self::resolve`]; on timeout this call removes it.
    /// Either way the id no longer shows up in [`Self::list_pending`].
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<String, OpError> {
        let mut rx = {
            let mut pending = self.pending.lock().await;
            let entry = pending
                .get_mut(id)
                .ok_or_else(|| OpError::UnknownChallenge(id.to_string()))?;
            entry
                .rx
                .take()
                .ok_or_else(|| OpError::UnknownChallenge(id.to_string()))?
        };

        tokio::select! {
            answer = &mut rx => match answer {
                // `resolve` removed the entry before sending.
                Ok(answer) => Ok(answer),
                // Sender dropped without an answer — treat as expiry.
                Err(_) => {
                    self.pending.lock().await.remove(id);
                    Err(OpError::ChallengeTimeout(id.to_string()))
                }
            },
            _ = tokio::time::sleep(timeout) => {
                // Arbitration point: removing the entry claims the timeout.
                // If `resolve` got there first the answer is already in flight
                // on the channel, so the wait still succeeds.
                let expired = self.pending.lock().await.remove(id).is_some();
                if expired {
                    warn!(challenge = %id, timeout_secs = timeout.as_secs(), "challenge expired unanswered");
                    Err(OpError::ChallengeTimeout(id.to_string()))
                } else {
                    match rx.await {
                        Ok(answer) => Ok(answer),
                        Err(_) => Err(OpError::ChallengeTimeout(id.to_string())),
                    }
                }
            }
        }
    }

    /// Deliver an operator answer. Returns `false` when no pending entry with
    /// this id exists (already resolved, expired, or never known) — a no-op,
    /// not an error. Safe to race against the waiter's timeout.
    pub async fn resolve(&self, id: &str, answer: &str) -> bool {
        let entry = self.pending.lock().await.remove(id);
        match entry {
            Some(entry) => {
                if entry.tx.send(answer.to_string()).is_err() {
                    // Waiter vanished between arbitration and delivery. The
                    // entry is gone either way; report the answer as consumed.
                    warn!(challenge = %id, "answer delivered to a departed waiter");
                }
                info!(challenge = %id, "challenge resolved by operator");
                true
            }
            None => {
                warn!(challenge = %id, "answer for unknown or terminal challenge ignored");
                false
            }
        }
    }

    /// Snapshot of all currently pending challenges for operator display.
    /// Resolved and expired entries never appear here.
    pub async fn list_pending(&self) -> Vec<Challenge> {
        let pending = self.pending.lock().await;
        let mut entries: Vec<Challenge> = pending.values().map(|e| e.meta.clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_unique_per_submission() {
        let queue = EscalationQueue::new();
        let a = queue.submit("acc", b"png").await;
        let b = queue.submit("acc", b"png").await;
        assert_ne!(a, b);
        assert!(a.starts_with("challenge_acc_"));
        assert_eq!(queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn wait_on_unknown_id_is_rejected() {
        let queue = EscalationQueue::new();
        let err = queue
            .wait("challenge_nobody_0_0", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::UnknownChallenge(_)));
    }

    #[tokio::test]
    async fn image_payload_is_base64() {
        let queue = EscalationQueue::new();
        queue.submit("acc", &[0x89, 0x50, 0x4e, 0x47]).await;
        let pending = queue.list_pending().await;
        assert_eq!(pending.len(), 1);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&pending[0].image)
            .unwrap();
        assert_eq!(decoded, vec![0x89, 0x50, 0x4e, 0x47]);
    }
}
