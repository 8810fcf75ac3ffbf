pub mod cleaner;
pub mod http_client;
pub mod parsers;
pub mod tables;
#[cfg(test)]
mod test_server;

use crate::config::{Credentials, HttpConfig, PortalConfig};
use crate::error::{FetchStage, PortalError};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tracing::{debug, info, warn};

use self::http_client::{Session, SessionManager};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Where the raw substitution-plan page comes from.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Authenticate and return the body of the substitution-plan page.
    async fn fetch_page(&self) -> Result<String, PortalError>;

    /// Forget any session state so the next fetch logs in from scratch.
    async fn reset_session(&self);
}

// ── Schulportal scraper ───────────────────────────────────────────────────────

pub struct SchulportalScraper {
    sessions: SessionManager,
    portal: PortalConfig,
    credentials: Credentials,
}

fn expect_ok(stage: FetchStage, resp: &Response) -> Result<(), PortalError> {
    match resp.status() {
        StatusCode::OK => Ok(()),
        other => Err(PortalError::request(stage, format!("HTTP {}", other))),
    }
}

impl SchulportalScraper {
    pub fn new(portal: &PortalConfig, credentials: Credentials, http: &HttpConfig) -> Self {
        Self {
            sessions: SessionManager::new(http.clone()),
            portal: portal.clone(),
            credentials,
        }
    }

    /// Form fields of the login POST; the portal expects `<school>.<user>`.
    fn login_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("user2", "user".to_string()),
            (
                "user",
                format!("{}.{}", self.portal.institution_id, self.credentials.username),
            ),
            ("password", self.credentials.password.clone()),
            ("skin", "sp".to_string()),
            ("timezone", "1".to_string()),
            ("url", self.portal.redirect_token.clone()),
        ]
    }

    async fn login(&self, session: &Session) -> Result<(), PortalError> {
        let login_url = self.portal.login_url.as_str();

        let resp = session
            .send(FetchStage::LoginPage, |c| c.get(login_url))
            .await?;
        expect_ok(FetchStage::LoginPage, &resp)?;
        if !session.has_cookies_for(login_url) {
            debug!("Login page set no cookies");
        }

        let form = self.login_form();
        let resp = session
            .send(FetchStage::Login, |c| c.post(login_url).form(&form))
            .await?;
        expect_ok(FetchStage::Login, &resp)?;

        self.sessions.mark_authenticated().await;
        info!("Logged in as {}", self.credentials.username);
        Ok(())
    }

    /// The landing page bounces back to the login form once a session expires.
    async fn verify_session(&self, session: &Session) -> Result<(), PortalError> {
        let landing = self.portal.landing_url.as_str();
        let resp = session
            .send(FetchStage::VerifySession, |c| c.get(landing))
            .await?;
        expect_ok(FetchStage::VerifySession, &resp)?;

        if resp.url().as_str().to_lowercase().contains("login") {
            warn!("Session check landed on {}", resp.url());
            return Err(PortalError::request(
                FetchStage::VerifySession,
                "session expired (redirected to login)",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PlanSource for SchulportalScraper {
    async fn fetch_page(&self) -> Result<String, PortalError> {
        if !self.sessions.is_active().await {
            debug!("Starting a new portal session");
        } else if let Some(at) = self.sessions.authenticated_at().await {
            debug!("Re-authenticating, last login at {}", at.format("%H:%M:%S"));
        }
        let session = self.sessions.acquire().await?;

        self.login(&session).await?;

        if self.portal.verify_session {
            self.verify_session(&session).await?;
        }

        let url = self.portal.substitute_url.as_str();
        let resp = session
            .send(FetchStage::SubstitutePlan, |c| c.get(url))
            .await?;
        expect_ok(FetchStage::SubstitutePlan, &resp)?;

        let body = resp
            .text()
            .await
            .map_err(|e| PortalError::request(FetchStage::SubstitutePlan, e.to_string()))?;
        debug!("Substitute plan page: {} bytes", body.len());
        Ok(body)
    }

    async fn reset_session(&self) {
        self.sessions.invalidate().await;
    }
}
