//! File-based config loader (`bazaar-pilot.json`) with env-var fallback.
//!
//! Resolution order for every scalar field: JSON value → env var → built-in
//! default. A missing config file is silent; a malformed one logs a warning
//! and falls back to defaults so the service still comes up.

use std::time::Duration;

use rand::distr::{Distribution, Uniform};
use serde::Deserialize;

use crate::markup::SiteMarkup;

// ── Human-emulation delay policy ─────────────────────────────────────────────

/// Randomized delay ranges in milliseconds, sampled uniformly.
///
/// These pauses are an anti-detection measure, not a correctness mechanism:
/// dropping them makes the automation trivially fingerprintable, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelayPolicy {
    /// After plain navigations.
    pub nav_ms: (u64, u64),
    /// Between short interactions (focus, small clicks).
    pub interact_ms: (u64, u64),
    /// After form submits, while the site reacts.
    pub submit_ms: (u64, u64),
    /// Between individual keystrokes while typing.
    pub keystroke_ms: (u64, u64),
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            nav_ms: (500, 1500),
            interact_ms: (300, 600),
            submit_ms: (1000, 3000),
            keystroke_ms: (40, 120),
        }
    }
}

impl DelayPolicy {
    /// Sample one delay from an inclusive range. Degenerate ranges collapse to
    /// their lower bound instead of panicking.
    pub fn sample(range: (u64, u64)) -> Duration {
        let (lo, hi) = range;
        let ms = if hi > lo {
            let mut rng = rand::rng();
            match Uniform::new_inclusive(lo, hi) {
                Ok(dist) => dist.sample(&mut rng),
                Err(_) => lo,
            }
        } else {
            lo
        };
        Duration::from_millis(ms)
    }

    pub async fn after_nav(&self) {
        tokio::time::sleep(Self::sample(self.nav_ms)).await;
    }

    pub async fn between_interactions(&self) {
        tokio::time::sleep(Self::sample(self.interact_ms)).await;
    }

    pub async fn after_submit(&self) {
        tokio::time::sleep(Self::sample(self.submit_ms)).await;
    }
}

// ── Top-level config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub delays: DelayPolicy,
    /// DOM selector table; site-markup knowledge is data, not code.
    pub site: SiteMarkup,
    /// How long a blocked operation waits for an operator answer.
    pub challenge_timeout_secs: Option<u64>,
    /// Bounded wait for a selector to materialize.
    pub selector_timeout_secs: Option<u64>,
    /// Sessions idle past this are evicted by the background sweep.
    pub session_max_age_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    /// Public hostname used to build operator-facing viewer URLs.
    pub public_host: Option<String>,
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl PilotConfig {
    /// JSON field → `PILOT_CHALLENGE_TIMEOUT_SECS` → 5 minutes.
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(
            self.challenge_timeout_secs
                .or_else(|| env_secs("PILOT_CHALLENGE_TIMEOUT_SECS"))
                .unwrap_or(300),
        )
    }

    /// JSON field → `PILOT_SELECTOR_TIMEOUT_SECS` → 10 seconds.
    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(
            self.selector_timeout_secs
                .or_else(|| env_secs("PILOT_SELECTOR_TIMEOUT_SECS"))
                .unwrap_or(10),
        )
    }

    /// JSON field → `PILOT_SESSION_MAX_AGE_SECS` → 10 minutes.
    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(
            self.session_max_age_secs
                .or_else(|| env_secs("PILOT_SESSION_MAX_AGE_SECS"))
                .unwrap_or(600),
        )
    }

    /// JSON field → `PILOT_SWEEP_INTERVAL_SECS` → 10 minutes.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .or_else(|| env_secs("PILOT_SWEEP_INTERVAL_SECS"))
                .unwrap_or(600),
        )
    }

    /// JSON field → `PILOT_PUBLIC_HOST` → `localhost`.
    pub fn resolve_public_host(&self) -> String {
        if let Some(h) = &self.public_host {
            if !h.trim().is_empty() {
                return h.clone();
            }
        }
        std::env::var("PILOT_PUBLIC_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Load `bazaar-pilot.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `PILOT_CONFIG` env var path
/// 2. `./bazaar-pilot.json`
/// 3. `../bazaar-pilot.json`
///
/// Missing file → defaults (silent). Parse error → warn, defaults.
pub fn load_config() -> PilotConfig {
    let mut candidates = vec![
        std::path::PathBuf::from("bazaar-pilot.json"),
        std::path::PathBuf::from("../bazaar-pilot.json"),
    ];
    if let Ok(env_path) = std::env::var("PILOT_CONFIG") {
        candidates.insert(0, std::path::PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PilotConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("bazaar-pilot.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "bazaar-pilot.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return PilotConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    PilotConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_samples_stay_in_range() {
        for _ in 0..200 {
            let d = DelayPolicy::sample((300, 600));
            assert!(d.as_millis() >= 300 && d.as_millis() <= 600);
        }
    }

    #[test]
    fn degenerate_range_collapses_to_lower_bound() {
        assert_eq!(DelayPolicy::sample((250, 250)).as_millis(), 250);
        assert_eq!(DelayPolicy::sample((250, 100)).as_millis(), 250);
    }

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = PilotConfig::default();
        assert_eq!(cfg.delays.nav_ms, (500, 1500));
        assert_eq!(cfg.delays.interact_ms, (300, 600));
        assert_eq!(cfg.delays.submit_ms, (1000, 3000));
        assert_eq!(cfg.challenge_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.selector_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.session_max_age(), Duration::from_secs(600));
    }

    #[test]
    fn json_overrides_apply() {
        let cfg: PilotConfig = serde_json::from_str(
            r#"{
                "delays": { "nav_ms": [100, 200] },
                "challenge_timeout_secs": 30,
                "public_host": "ops.example.com"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.delays.nav_ms, (100, 200));
        // Unspecified ranges keep their defaults.
        assert_eq!(cfg.delays.keystroke_ms, (40, 120));
        assert_eq!(cfg.challenge_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.resolve_public_host(), "ops.example.com");
    }
}
