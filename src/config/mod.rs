use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Portal account and endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Display name of the sensor
    #[serde(default)]
    pub name: Option<String>,

    /// School number prepended to the username at login
    #[serde(default = "default_institution_id")]
    pub institution_id: String,

    #[serde(default = "default_login_url")]
    pub login_url: String,

    #[serde(default = "default_landing_url")]
    pub landing_url: String,

    #[serde(default = "default_substitute_url")]
    pub substitute_url: String,

    /// Base64 target the login form redirects to
    #[serde(default = "default_redirect_token")]
    pub redirect_token: String,

    /// Check the landing page after login before fetching the plan
    #[serde(default)]
    pub verify_session: bool,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_backoff_factor_ms")]
    pub backoff_factor_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

/// Refresh cadence and error escalation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    #[serde(default = "default_cache_minutes")]
    pub cache_minutes: u64,

    #[serde(default = "default_max_errors")]
    pub max_errors: u32,

    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_min_update_interval_secs")]
    pub min_update_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_institution_id() -> String {
    "6013".to_string()
}
fn default_login_url() -> String {
    "https://login.schulportal.hessen.de/?url=aHR0cHM6Ly9jb25uZWN0LnNjaHVscG9ydGFsLmhlc3Nlbi5kZS8=&skin=sp&i=6013"
        .to_string()
}
fn default_landing_url() -> String {
    "https://connect.schulportal.hessen.de/".to_string()
}
fn default_substitute_url() -> String {
    "https://start.schulportal.hessen.de/vertretungsplan.php".to_string()
}
fn default_redirect_token() -> String {
    "aHR0cHM6Ly9jb25uZWN0LnNjaHVscG9ydGFsLmhlc3Nlbi5kZS8=".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_read_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> usize {
    3
}
fn default_backoff_factor_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}
fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string()
}
fn default_accept_language() -> String {
    "en-US,en;q=0.5".to_string()
}
fn default_cache_minutes() -> u64 {
    15
}
fn default_max_errors() -> u32 {
    3
}
fn default_scan_interval_secs() -> u64 {
    3600
}
fn default_min_update_interval_secs() -> u64 {
    45
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            name: None,
            institution_id: default_institution_id(),
            login_url: default_login_url(),
            landing_url: default_landing_url(),
            substitute_url: default_substitute_url(),
            redirect_token: default_redirect_token(),
            verify_session: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_factor_ms: default_backoff_factor_ms(),
            user_agent: default_user_agent(),
            accept: default_accept(),
            accept_language: default_accept_language(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cache_minutes: default_cache_minutes(),
            max_errors: default_max_errors(),
            scan_interval_secs: default_scan_interval_secs(),
            min_update_interval_secs: default_min_update_interval_secs(),
        }
    }
}

impl RefreshConfig {
    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_minutes * 60)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_update_interval_secs)
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// Validated account data; the password never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub name: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("name", &self.name)
            .finish()
    }
}

fn present(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl PortalConfig {
    pub fn credentials(&self) -> Result<Credentials> {
        match (present(&self.username), present(&self.password), present(&self.name)) {
            (Some(username), Some(password), Some(name)) => Ok(Credentials {
                username,
                password,
                name,
            }),
            _ => bail!("Missing required configuration: username, password, or name"),
        }
    }

    /// Let command-line values win over loaded ones; blank values are ignored.
    pub fn override_credentials(
        &mut self,
        username: Option<String>,
        password: Option<String>,
        name: Option<String>,
    ) {
        for (slot, value) in [
            (&mut self.username, username),
            (&mut self.password, password),
            (&mut self.name, name),
        ] {
            if let Some(v) = present(&value) {
                *slot = Some(v);
            }
        }
    }

    pub fn validate_urls(&self) -> Result<()> {
        for (field, value) in [
            ("login_url", &self.login_url),
            ("landing_url", &self.landing_url),
            ("substitute_url", &self.substitute_url),
        ] {
            let parsed = url::Url::parse(value)
                .with_context(|| format!("Invalid URL in portal.{}: {:?}", field, value))?;
            if !parsed.has_host() || !matches!(parsed.scheme(), "http" | "https") {
                bail!("Invalid URL in portal.{}: {:?} needs an http(s) scheme and host", field, value);
            }
        }
        Ok(())
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("KSF").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Failed to read configuration")?;
        app_cfg.portal.validate_urls()?;
        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(username: Option<&str>, password: Option<&str>, name: Option<&str>) -> PortalConfig {
        PortalConfig {
            username: username.map(String::from),
            password: password.map(String::from),
            name: name.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_credentials_require_all_fields() {
        assert!(portal(Some("max"), Some("pw"), Some("kid")).credentials().is_ok());
        for p in [
            portal(None, Some("pw"), Some("kid")),
            portal(Some("max"), None, Some("kid")),
            portal(Some("max"), Some("pw"), Some("   ")),
        ] {
            let err = p.credentials().unwrap_err();
            assert!(err.to_string().contains("Missing required configuration"));
        }
    }

    #[test]
    fn test_cli_credentials_override_loaded_ones() {
        let mut p = portal(Some("from_file"), Some("pw"), None);
        p.override_credentials(Some("from_cli".into()), Some("  ".into()), Some("kid".into()));
        let creds = p.credentials().unwrap();
        assert_eq!(creds.username, "from_cli");
        assert_eq!(creds.password, "pw");
        assert_eq!(creds.name, "kid");

        p.override_credentials(None, None, None);
        assert_eq!(p.username.as_deref(), Some("from_cli"));
    }

    #[test]
    fn test_password_is_redacted() {
        let creds = portal(Some("max"), Some("geheim"), Some("kid")).credentials().unwrap();
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("geheim"));
        assert!(shown.contains("max"));
    }

    #[test]
    fn test_default_urls_are_valid() {
        assert!(PortalConfig::default().validate_urls().is_ok());
        let broken = PortalConfig {
            substitute_url: "vertretungsplan.php".into(),
            ..Default::default()
        };
        assert!(broken.validate_urls().is_err());
    }

    #[test]
    fn test_defaults_match_portal_behaviour() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.http.connect_timeout_secs, 5);
        assert_eq!(cfg.http.read_timeout_secs, 15);
        assert_eq!(cfg.http.max_retries, 3);
        assert_eq!(cfg.refresh.cache_duration(), Duration::from_secs(15 * 60));
        assert_eq!(cfg.refresh.max_errors, 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[portal]\nusername = \"max\"\n[refresh]\ncache_minutes = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.portal.username.as_deref(), Some("max"));
        assert_eq!(cfg.portal.institution_id, "6013");
        assert_eq!(cfg.refresh.cache_minutes, 5);
        assert_eq!(cfg.http.user_agent, "Mozilla/5.0");
    }
}
