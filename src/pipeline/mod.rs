//! Refresh orchestrator: ties the plan source, the page parser and the cache
//! together.
//!
//! ## One refresh
//!
//! `update()` is meant to be called from a timer:
//!   1. If another refresh is running, log and return (`Busy`).
//!   2. If a plan is cached and younger than the freshness window, return
//!      (`Cached`) without touching the network.
//!   3. Otherwise fetch the page, parse it, serialize the plan to JSON and
//!      swap it into the cache.
//!
//! Failures never escape: each one bumps the error counter. Reaching
//! `max_errors` marks the plan `unavailable` and drops the portal session so
//! the next attempt logs in from scratch. A success resets the counter.

use crate::config::RefreshConfig;
use crate::error::PortalError;
use crate::scraper::PlanSource;
use crate::scraper::parsers::parse_substitution_page;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Ok,
    Unavailable,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Ok => "ok",
            Status::Unavailable => "unavailable",
        }
    }
}

/// Last good plan plus the bookkeeping around it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    /// JSON list of substitution days
    pub plan: Option<String>,
    pub last_update: Option<DateTime<Local>>,
    pub error_count: u32,
    pub status: Status,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Local>, window: Duration) -> bool {
        match (&self.plan, self.last_update) {
            (Some(_), Some(last)) => (now - last)
                .to_std()
                .map(|age| age < window)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Busy,
    Cached,
    Updated { days: usize },
    Failed(PortalError),
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub cache_duration: Duration,
    pub max_errors: u32,
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(cfg: &RefreshConfig) -> Self {
        Self {
            cache_duration: cfg.cache_duration(),
            max_errors: cfg.max_errors,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        (&RefreshConfig::default()).into()
    }
}

pub struct PlanData {
    source: Arc<dyn PlanSource>,
    policy: RefreshPolicy,
    update_lock: Mutex<()>,
    cache: RwLock<CacheEntry>,
}

impl PlanData {
    pub fn new(source: Arc<dyn PlanSource>, policy: RefreshPolicy) -> Self {
        Self {
            source,
            policy,
            update_lock: Mutex::new(()),
            cache: RwLock::new(CacheEntry::default()),
        }
    }

    /// Copy of the current cache entry.
    pub fn snapshot(&self) -> CacheEntry {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn update(&self) -> RefreshOutcome {
        let Ok(_guard) = self.update_lock.try_lock() else {
            warn!("Update already in progress");
            return RefreshOutcome::Busy;
        };

        let now = Local::now();
        if self.snapshot().is_fresh(now, self.policy.cache_duration) {
            debug!("Cached plan still fresh, skipping fetch");
            return RefreshOutcome::Cached;
        }

        let result = self.get_substitute_plan().await;

        let (outcome, escalate) = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok((plan, days)) => {
                    cache.plan = Some(plan);
                    cache.last_update = Some(now);
                    cache.error_count = 0;
                    cache.status = Status::Ok;
                    (RefreshOutcome::Updated { days }, false)
                }
                Err(e) => {
                    cache.error_count += 1;
                    let escalate = cache.error_count >= self.policy.max_errors;
                    if escalate {
                        cache.status = Status::Unavailable;
                        error!(
                            "Too many errors ({}), marking as unavailable",
                            cache.error_count
                        );
                    }
                    (RefreshOutcome::Failed(e), escalate)
                }
            }
        };

        if escalate {
            self.source.reset_session().await;
        }
        outcome
    }

    /// One pass of fetch → parse → serialize.
    async fn get_substitute_plan(&self) -> Result<(String, usize), PortalError> {
        let result = async {
            let page = self.source.fetch_page().await?;
            let plan = parse_substitution_page(&page)?;
            let json = serde_json::to_string(&plan)?;
            Ok::<_, PortalError>((json, plan.len()))
        }
        .await;

        match &result {
            Ok((_, days)) => info!("Substitute plan refreshed: {} days", days),
            Err(e @ PortalError::Request { .. }) => error!("Request error: {}", e),
            Err(e @ PortalError::Parsing(_)) => error!("Parsing error: {}", e),
            Err(e) => error!("Unexpected error: {}", e),
        }
        result
    }
}
