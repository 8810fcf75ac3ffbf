use crate::config::HttpConfig;
use crate::error::{FetchStage, PortalError};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

/// Server errors worth another attempt.
pub const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

// ── Retry policy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff_factor_ms: u64,
}

impl RetryPolicy {
    /// Delays between attempts: factor·2, factor·4, factor·8, …
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.backoff_factor_ms)
            .max_delay(Duration::from_secs(60))
            .take(self.max_retries)
    }
}

enum AttemptError {
    Status(StatusCode),
    Transport(reqwest::Error),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Status(_) => true,
            AttemptError::Transport(e) => e.is_connect() || e.is_timeout(),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A client together with the cookie jar it writes to.
#[derive(Clone)]
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    retry: RetryPolicy,
}

impl Session {
    fn build(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&config.accept).context("Invalid Accept header")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid Accept-Language header")?,
        );

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .gzip(true)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            jar,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_factor_ms: config.backoff_factor_ms,
            },
        })
    }

    /// Whether the jar holds any cookie that would be sent to `url`.
    pub fn has_cookies_for(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| self.jar.cookies(&u))
            .is_some()
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// `make` is called once per attempt. Any status other than the retried
    /// server errors is handed back to the caller as-is.
    pub async fn send<F>(&self, stage: FetchStage, make: F) -> Result<Response, PortalError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        let action = || {
            attempt += 1;
            let request = make(&self.client);
            let n = attempt;
            async move {
                debug!("{} (attempt {})", stage, n);
                match request.send().await {
                    Ok(resp) if RETRY_STATUSES.contains(&resp.status()) => {
                        warn!("{}: HTTP {} on attempt {}", stage, resp.status(), n);
                        Err(AttemptError::Status(resp.status()))
                    }
                    Ok(resp) => Ok(resp),
                    Err(e) => {
                        warn!("{}: request failed on attempt {}: {}", stage, n, e);
                        Err(AttemptError::Transport(e))
                    }
                }
            }
        };

        RetryIf::spawn(self.retry.delays(), action, AttemptError::is_transient)
            .await
            .map_err(|e| match e {
                AttemptError::Status(s) => {
                    PortalError::request(stage, format!("HTTP {} after retries", s))
                }
                AttemptError::Transport(e) => PortalError::request(stage, e.to_string()),
            })
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

struct SessionSlot {
    session: Session,
    authenticated_at: Option<DateTime<Local>>,
}

/// Owns the lazily built session; see [`SessionManager::acquire`].
pub struct SessionManager {
    config: HttpConfig,
    slot: Mutex<Option<SessionSlot>>,
}

impl SessionManager {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Current session, building one first if there is none.
    pub async fn acquire(&self) -> Result<Session, PortalError> {
        let mut slot = self.slot.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.session.clone());
        }

        let session = Session::build(&self.config)
            .map_err(|e| PortalError::Unexpected(format!("{:#}", e)))?;
        debug!("Built new HTTP session");
        *slot = Some(SessionSlot {
            session: session.clone(),
            authenticated_at: None,
        });
        Ok(session)
    }

    pub async fn mark_authenticated(&self) {
        if let Some(slot) = self.slot.lock().await.as_mut() {
            slot.authenticated_at = Some(Local::now());
        }
    }

    pub async fn authenticated_at(&self) -> Option<DateTime<Local>> {
        self.slot.lock().await.as_ref().and_then(|s| s.authenticated_at)
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Drop the client and its cookies; the next `acquire` starts fresh.
    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            info!("HTTP session discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::test_server::StubServer;
    use tokio_test::assert_ok;

    fn manager() -> SessionManager {
        SessionManager::new(HttpConfig::default())
    }

    fn quick_retries(max_retries: usize) -> Session {
        Session::build(&HttpConfig {
            max_retries,
            backoff_factor_ms: 1,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_factor_ms: 500,
        };
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ]
        );
    }

    #[tokio::test]
    async fn test_acquire_reuses_session() {
        let m = manager();
        let a = assert_ok!(m.acquire().await);
        let b = assert_ok!(m.acquire().await);
        assert!(Arc::ptr_eq(&a.jar, &b.jar));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_builds_once() {
        let m = manager();
        let (a, b) = tokio::join!(m.acquire(), m.acquire());
        assert!(Arc::ptr_eq(&a.unwrap().jar, &b.unwrap().jar));
    }

    #[tokio::test]
    async fn test_invalidate_drops_cookies_and_auth() {
        let m = manager();
        let first = assert_ok!(m.acquire().await);
        let url = url::Url::parse("https://start.schulportal.hessen.de/").unwrap();
        first.jar.add_cookie_str("sid=abc; Domain=schulportal.hessen.de", &url);
        assert!(first.has_cookies_for("https://start.schulportal.hessen.de/vertretungsplan.php"));
        m.mark_authenticated().await;
        assert!(m.authenticated_at().await.is_some());

        m.invalidate().await;
        assert!(!m.is_active().await);
        assert!(m.authenticated_at().await.is_none());

        let second = assert_ok!(m.acquire().await);
        assert!(!Arc::ptr_eq(&first.jar, &second.jar));
        assert!(!second.has_cookies_for("https://start.schulportal.hessen.de/vertretungsplan.php"));
    }

    #[tokio::test]
    async fn test_server_error_then_success_retries_once() {
        let server = StubServer::start(vec![("/plan", vec![503, 200])]).await;
        let session = quick_retries(3);
        let url = server.url("/plan");

        let resp = assert_ok!(session.send(FetchStage::SubstitutePlan, |c| c.get(&url)).await);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(server.requests(), vec!["GET /plan", "GET /plan"]);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = StubServer::start(vec![("/missing", vec![404])]).await;
        let session = quick_retries(3);
        let url = server.url("/missing");

        let resp = assert_ok!(session.send(FetchStage::SubstitutePlan, |c| c.get(&url)).await);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(server.requests(), vec!["GET /missing"]);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_a_request_error() {
        let server = StubServer::start(vec![("/plan", vec![502, 502, 502, 200])]).await;
        let session = quick_retries(2);
        let url = server.url("/plan");

        let err = session
            .send(FetchStage::SubstitutePlan, |c| c.get(&url))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PortalError::Request {
                stage: FetchStage::SubstitutePlan,
                ..
            }
        ));
        assert_eq!(server.requests().len(), 3);
    }
}
