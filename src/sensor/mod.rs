//! Observable state surface for a polling host.

use crate::config::{AppConfig, Credentials};
use crate::pipeline::{PlanData, RefreshOutcome, RefreshPolicy, Status};
use crate::scraper::{PlanSource, SchulportalScraper};
use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Attribute bundle published with every state update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAttributes {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "FriendlyName")]
    pub friendly_name: String,
    #[serde(rename = "SubstitutePlan")]
    pub substitute_plan: Option<String>,
    #[serde(rename = "LastUpdate")]
    pub last_update: Option<String>,
    #[serde(rename = "State")]
    pub state: Status,
}

pub struct PlanSensor {
    data: PlanData,
    name: String,
    username: String,
    state: Option<String>,
    available: bool,
    min_interval: Duration,
    last_polled: Option<Instant>,
}

impl PlanSensor {
    /// Build a sensor for the configured account; fails without credentials.
    pub fn setup(config: &AppConfig) -> Result<Self> {
        let credentials = config.portal.credentials()?;
        let source = SchulportalScraper::new(&config.portal, credentials.clone(), &config.http);
        Ok(Self::with_source(
            Arc::new(source),
            &credentials,
            RefreshPolicy::from(&config.refresh),
            config.refresh.min_update_interval(),
        ))
    }

    pub fn with_source(
        source: Arc<dyn PlanSource>,
        credentials: &Credentials,
        policy: RefreshPolicy,
        min_interval: Duration,
    ) -> Self {
        Self {
            data: PlanData::new(source, policy),
            name: format!("ksf_daten_{}", credentials.name),
            username: credentials.username.clone(),
            state: None,
            available: true,
            min_interval,
            last_polled: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// `HH:MM` of the last poll, or `unavailable`.
    pub fn state(&self) -> Option<&str> {
        if self.available {
            self.state.as_deref()
        } else {
            Some(STATE_UNAVAILABLE)
        }
    }

    pub fn attributes(&self) -> SensorAttributes {
        let entry = self.data.snapshot();
        SensorAttributes {
            name: self.name.clone(),
            friendly_name: self.username.clone(),
            substitute_plan: entry.plan,
            last_update: entry.last_update.map(|t| t.to_rfc3339()),
            state: entry.status,
        }
    }

    /// Poll the plan; calls closer together than the minimum interval are ignored.
    pub async fn update(&mut self) -> Option<RefreshOutcome> {
        if self
            .last_polled
            .is_some_and(|last| last.elapsed() < self.min_interval)
        {
            debug!("{}: throttled", self.name);
            return None;
        }
        self.last_polled = Some(Instant::now());

        debug!("Updating KSF data for {}", self.username);
        let outcome = self.data.update().await;
        self.available = self.data.snapshot().status != Status::Unavailable;
        self.state = Some(Local::now().format("%H:%M").to_string());
        info!(
            "Update KSF done for {} ({})",
            self.username,
            self.data.snapshot().status.as_str()
        );
        Some(outcome)
    }
}
