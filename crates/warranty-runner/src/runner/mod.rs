pub mod certificate;
mod driver;
mod flow;
mod interact;
mod locator;
mod overlay;
mod session;

pub use certificate::Download;
pub use driver::{Gesture, PageDriver, Resolved};
pub use flow::{FlowOutcome, FlowState, RegistrationFlow};
pub use interact::{FormFiller, TypeOptions};
pub use locator::{LocateOptions, Located, Locator};
pub use overlay::{OverlayKind, OverlayResolver};
pub use session::Session;

use crate::config::{Config, RetryConfig, SelectorTable};
use crate::request::{CertificateRef, RegistrationRequest, RegistrationResult};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warranty_retention::RetentionTracker;

/// Runs registrations: one fresh browser session per request.
pub struct Runner {
    config: Config,
    table: SelectorTable,
    tracker: Option<Arc<RetentionTracker>>,
}

impl Runner {
    /// Create a runner; the retention tracker lives in the download dir.
    pub fn new(config: Config) -> Result<Self> {
        let table = config.selector_table()?;
        let hours = i64::try_from(config.downloads.retention_hours)
            .map_err(|_| Error::Config("downloads.retention_hours is too large".into()))?;
        let tracker = RetentionTracker::with_hours(&config.downloads.dir, hours)?;
        Ok(Self {
            config,
            table,
            tracker: Some(Arc::new(tracker)),
        })
    }

    /// Share an existing tracker (or none) instead of opening one.
    pub fn with_tracker(mut self, tracker: Option<Arc<RetentionTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> Option<&Arc<RetentionTracker>> {
        self.tracker.as_ref()
    }

    /// Launch a browser, run the flow, always tear the browser down.
    pub async fn register(&self, request: &RegistrationRequest) -> RegistrationResult {
        let request = match prepare(request) {
            Ok(r) => r,
            Err(e) => return failed(e),
        };

        let session = match Session::open(&self.config).await {
            Ok(s) => s,
            Err(e) => return failed(e),
        };

        let run = self.drive_prepared(&session, &request);
        let result = match self.config.retry.deadline_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Run exceeded its {}s deadline; tearing the session down", secs);
                    session.capture("deadline").await;
                    failed(Error::Timeout(format!("run exceeded its {}s deadline", secs)))
                }
            },
            None => run.await,
        };

        session.close().await;
        result
    }

    /// Same boundary as [`Runner::register`] over any page driver.
    pub async fn drive(
        &self,
        driver: &dyn PageDriver,
        request: &RegistrationRequest,
    ) -> RegistrationResult {
        match prepare(request) {
            Ok(request) => self.drive_prepared(driver, &request).await,
            Err(e) => failed(e),
        }
    }

    async fn drive_prepared(
        &self,
        driver: &dyn PageDriver,
        request: &RegistrationRequest,
    ) -> RegistrationResult {
        let start = Instant::now();
        let mut flow = RegistrationFlow::new(driver, &self.table, &self.config);
        let outcome = match flow.run(request).await {
            Ok(outcome) => outcome,
            Err(e) => return failed(e),
        };
        debug!(
            "Flow reached {} in {}ms ({} overlays)",
            outcome.reached,
            start.elapsed().as_millis(),
            outcome.overlays_handled
        );

        let Some(download) = outcome.certificate else {
            return RegistrationResult::success(format!(
                "form filled through {}; no customer details, nothing submitted",
                outcome.reached
            ));
        };

        match self.persist(&download, request) {
            Ok(cert) => RegistrationResult::success_with_certificate("warranty registered", cert),
            Err(e) => failed(e),
        }
    }

    fn persist(
        &self,
        download: &Download,
        request: &RegistrationRequest,
    ) -> Result<CertificateRef> {
        let cert = certificate::save(&self.config.downloads.dir, download, request)?;
        if let Some(tracker) = &self.tracker {
            tracker.record(
                &cert.filename,
                &request.customer_label().unwrap_or_default(),
                request.products.len(),
                &cert.file_path,
            )?;
        }
        Ok(cert)
    }

    /// Caller-side whole-run retry. Business rejections are never retried.
    pub async fn register_with_retry(
        &self,
        request: &RegistrationRequest,
        retry: &RetryConfig,
    ) -> RegistrationResult {
        let attempts = retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                info!("Retry attempt {}/{}", attempt, attempts);
                if retry.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(retry.delay_ms)).await;
                }
            }

            let result = self.register(request).await;
            if result.success {
                return result;
            }
            let retryable = result.kind().map(|k| k.is_retryable()).unwrap_or(true);
            if !retryable || attempt >= attempts {
                return result;
            }
            warn!("Attempt {} failed: {}", attempt, result.message);
            attempt += 1;
        }
    }
}

fn prepare(request: &RegistrationRequest) -> Result<RegistrationRequest> {
    let request = request.normalized();
    request.validate()?;
    Ok(request)
}

fn failed(e: Error) -> RegistrationResult {
    warn!("Registration failed ({}): {}", e.kind().code(), e);
    RegistrationResult::failure(&e)
}
