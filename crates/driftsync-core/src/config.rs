// ── Engine tuning ──
//
// Runtime knobs for one engine instance. Core never reads config files;
// `driftsync-config` builds an `EngineConfig` and hands it in.

use std::time::Duration;

use url::Url;

/// Endpoint probed by the default online checker.
pub const DEFAULT_PROBE_URL: &str = "https://clients3.google.com/generate_204";

/// Configuration for one sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound of simultaneously in-flight commands (at least 1).
    pub max_concurrent_requests: usize,
    /// Debounce window before a command may be dispatched.
    pub min_command_age_secs: u64,
    /// Period of the dispatcher timer (at least 1).
    pub seconds_between_syncs: u64,
    /// Prefix of the `-data` and `-state` storage keys.
    pub storage_prefix: String,
    /// Target of the default reachability probe. `None` assumes online.
    pub probe_url: Option<Url>,
    pub probe_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 3,
            min_command_age_secs: 0,
            seconds_between_syncs: 5,
            storage_prefix: "sync-service".into(),
            probe_url: Url::parse(DEFAULT_PROBE_URL).ok(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Clamp values into their valid ranges.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
        self.seconds_between_syncs = self.seconds_between_syncs.max(1);
        self
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.seconds_between_syncs.max(1))
    }

    pub fn min_command_age(&self) -> chrono::Duration {
        i64::try_from(self.min_command_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
