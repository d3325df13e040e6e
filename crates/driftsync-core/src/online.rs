// ── Online detection ──
//
// The dispatcher asks an `OnlineChecker` before every tick. The default
// is an HTTP reachability probe; tests and embedders swap in their own.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;
use url::Url;

use crate::error::SyncError;

#[async_trait]
pub trait OnlineChecker: Send + Sync {
    async fn is_online(&self) -> bool;
}

#[async_trait]
impl<F> OnlineChecker for F
where
    F: Fn() -> bool + Send + Sync,
{
    async fn is_online(&self) -> bool {
        self()
    }
}

/// Checker that never reports offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl OnlineChecker for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Considers the device online when `url` answers a HEAD request at all.
///
/// Any HTTP status counts as reachable; only transport failures and
/// timeouts mean offline.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    http: reqwest::Client,
    url: Url,
}

impl ReachabilityProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("driftsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config {
                message: format!("failed to build reachability client: {e}"),
            })?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl OnlineChecker for ReachabilityProbe {
    async fn is_online(&self) -> bool {
        match self.http.head(self.url.clone()).send().await {
            Ok(resp) => {
                trace!(url = %self.url, status = %resp.status(), "reachability probe answered");
                true
            }
            Err(e) => {
                trace!(url = %self.url, error = %e, "reachability probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn probe_is_online_when_server_answers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let probe = ReachabilityProbe::new(url, Duration::from_secs(2)).unwrap();

        assert!(probe.is_online().await);
    }

    #[tokio::test]
    async fn probe_is_offline_when_nothing_listens() {
        let server = MockServer::start().await;
        let url = Url::parse(&server.uri()).unwrap();
        drop(server);

        let probe = ReachabilityProbe::new(url, Duration::from_millis(500)).unwrap();

        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn closures_are_checkers() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&flag);
        let checker = move || observed.load(Ordering::SeqCst);

        assert!(!checker.is_online().await);
        flag.store(true, Ordering::SeqCst);
        assert!(checker.is_online().await);
    }
}
