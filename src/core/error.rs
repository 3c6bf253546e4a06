use thiserror::Error;

/// Typed failure causes surfaced to an operation's caller.
///
/// None of these are retried internally — retry, if desired, belongs to the
/// caller at operation granularity. Page resources are always released before
/// one of these propagates; the *session* survives everything except an
/// explicit close, the idle sweep, and a terminal login failure.
#[derive(Debug, Error)]
pub enum OpError {
    /// Browser launch failed; no session slot was registered.
    #[error("session creation failed: {0}")]
    SessionCreationFailed(String),

    /// The authenticated-state check failed — cookies absent or stale.
    #[error("not authenticated: cookies absent or stale")]
    NotAuthenticated,

    /// Credential flow exhausted without reaching an authenticated state.
    #[error("login failed: credential flow did not reach an authenticated state")]
    LoginFailed,

    /// The operator did not answer within the configured bound. The challenge
    /// entry has already been purged when this is raised.
    #[error("challenge {0} timed out waiting for an operator answer")]
    ChallengeTimeout(String),

    #[error("navigation to {url} did not settle within {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("element `{selector}` did not appear within {timeout_ms}ms")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    /// An operator answer referenced a challenge with no pending entry.
    /// Reported to the caller as a no-op, never as a crash.
    #[error("no pending challenge with id {0}")]
    UnknownChallenge(String),

    /// CDP plumbing errors that carry no domain meaning.
    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}
