use std::fmt;

/// Step of the login + retrieval sequence a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    LoginPage,
    Login,
    VerifySession,
    SubstitutePlan,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchStage::LoginPage => "login page",
            FetchStage::Login => "login",
            FetchStage::VerifySession => "session check",
            FetchStage::SubstitutePlan => "substitute plan",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("request failed at {stage}: {reason}")]
    Request { stage: FetchStage, reason: String },

    #[error("parsing failed: {0}")]
    Parsing(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PortalError {
    pub fn request(stage: FetchStage, reason: impl Into<String>) -> Self {
        PortalError::Request {
            stage,
            reason: reason.into(),
        }
    }

    pub fn is_parsing(&self) -> bool {
        matches!(self, PortalError::Parsing(_))
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(e: serde_json::Error) -> Self {
        PortalError::Unexpected(format!("plan serialization: {}", e))
    }
}
