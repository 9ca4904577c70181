//! # warranty-runner
//!
//! Fills and submits a third-party warranty-registration form in a real
//! browser and hands back the generated certificate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warranty_runner::{Config, RegistrationRequest, Runner};
//!
//! # #[tokio::main]
//! # async fn main() -> warranty_runner::Result<()> {
//! let config = Config::load("warranty.yaml")?;
//! let request: RegistrationRequest =
//!     serde_json::from_str(&std::fs::read_to_string("request.json")?)?;
//! let runner = Runner::new(config)?;
//! let result = runner.register(&request).await;
//! println!("Success: {}", result.success);
//! # Ok(())
//! # }
//! ```

mod config;
mod request;
mod runner;

pub use config::{
    names, BrowserConfig, BrowserPosture, CaptureConfig, Config, DownloadConfig, Environment,
    OverlayConfig, Params, Pick, RetryConfig, SelectorTable, Strategy, StrategyTier, Timeouts,
};
pub use request::{
    CertificateRef, Customer, Dealer, ErrorKind, Product, RegistrationRequest, RegistrationResult,
};
pub use runner::{
    certificate, Download, FlowOutcome, FlowState, FormFiller, Gesture, LocateOptions, Located,
    Locator, OverlayKind, OverlayResolver, PageDriver, RegistrationFlow, Resolved, Runner,
    Session, TypeOptions,
};

/// Result type for warranty-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during config loading or a registration run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("retention error: {0}")]
    Retention(#[from] warranty_retention::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serial {0} is already registered")]
    AlreadyRegistered(String),

    #[error("serial {0} was rejected as invalid")]
    InvalidSerial(String),

    #[error("element '{name}' not found (tried: {})", .tried.join(", "))]
    NotFound { name: String, tried: Vec<String> },

    #[error("automation failed: {0}")]
    Automation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session teardown failed: {0}")]
    Teardown(String),
}

impl Error {
    /// Map onto the caller-facing error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::InvalidSerial(_) => ErrorKind::InvalidSerial,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Teardown(_) => ErrorKind::ResourceTeardown,
            _ => ErrorKind::AutomationError,
        }
    }

    /// Whether a whole-run retry could change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Yaml(_)) && self.kind().is_retryable()
    }

    pub(crate) fn not_found(name: &str, tried: Vec<String>) -> Self {
        Self::NotFound {
            name: name.to_string(),
            tried,
        }
    }
}
