//! Bookkeeping for saved warranty certificates.
//!
//! Every certificate written to the download directory gets an entry in a
//! JSON side-file keyed by filename. Entries are marked delivered once the
//! certificate has been handed back to the caller, and a cleanup pass deletes
//! files older than the retention window (measured from delivery when
//! delivered, from creation otherwise) along with entries whose file is gone.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Name of the metadata side-file inside the download directory.
pub const METADATA_FILE: &str = "certificates-metadata.json";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown certificate: {0}")]
    UnknownCertificate(String),

    #[cfg(feature = "async")]
    #[error("Join error: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One tracked certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEntry {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub webhook_delivered: bool,
    #[serde(default)]
    pub webhook_delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub customer_label: String,
    #[serde(default)]
    pub product_count: usize,
    pub file_path: PathBuf,
}

impl CertificateEntry {
    /// Instant the retention window is measured from.
    pub fn retention_start(&self) -> DateTime<Utc> {
        match (self.webhook_delivered, self.webhook_delivered_at) {
            (true, Some(at)) => at,
            _ => self.created_at,
        }
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Filenames deleted because they outlived the window.
    pub expired: Vec<String>,
    /// Entries dropped because their file no longer exists.
    pub orphaned: Vec<String>,
    /// Entries still within the window.
    pub retained: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.orphaned.len()
    }
}

/// Metadata store for one download directory.
///
/// All mutations load the full map, change it, and write the full map back
/// while holding one lock, so concurrent `record`/`cleanup` calls from the
/// same process never lose updates.
#[derive(Debug)]
pub struct RetentionTracker {
    dir: PathBuf,
    window: Duration,
    lock: Mutex<()>,
}

impl RetentionTracker {
    /// Open (or prepare) the tracker for `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>, window: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            window,
            lock: Mutex::new(()),
        })
    }

    /// Convenience constructor for a window expressed in hours.
    pub fn with_hours(dir: impl Into<PathBuf>, hours: i64) -> Result<Self> {
        Self::open(dir, Duration::hours(hours))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Record a freshly saved certificate.
    pub fn record(
        &self,
        filename: &str,
        customer_label: &str,
        product_count: usize,
        file_path: impl Into<PathBuf>,
    ) -> Result<CertificateEntry> {
        self.record_at(filename, customer_label, product_count, file_path, Utc::now())
    }

    pub fn record_at(
        &self,
        filename: &str,
        customer_label: &str,
        product_count: usize,
        file_path: impl Into<PathBuf>,
        now: DateTime<Utc>,
    ) -> Result<CertificateEntry> {
        let entry = CertificateEntry {
            created_at: now,
            webhook_delivered: false,
            webhook_delivered_at: None,
            customer_label: customer_label.to_string(),
            product_count,
            file_path: file_path.into(),
        };
        let _guard = self.guard();
        let mut map = self.load()?;
        map.insert(filename.to_string(), entry.clone());
        self.save(&map)?;
        info!("Recorded certificate {} ({} products)", filename, product_count);
        Ok(entry)
    }

    /// Mark a certificate as delivered to the caller.
    pub fn mark_delivered(&self, filename: &str) -> Result<()> {
        self.mark_delivered_at(filename, Utc::now())
    }

    pub fn mark_delivered_at(&self, filename: &str, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        let entry = map
            .get_mut(filename)
            .ok_or_else(|| Error::UnknownCertificate(filename.to_string()))?;
        entry.webhook_delivered = true;
        entry.webhook_delivered_at = Some(now);
        self.save(&map)?;
        debug!("Marked {} delivered", filename);
        Ok(())
    }

    /// Snapshot of all tracked entries.
    pub fn entries(&self) -> Result<BTreeMap<String, CertificateEntry>> {
        let _guard = self.guard();
        self.load()
    }

    /// Run one cleanup pass against the current time.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.cleanup_at(Utc::now())
    }

    /// Run one cleanup pass as if the current time were `now`.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let _guard = self.guard();
        let mut map = self.load()?;
        let mut report = CleanupReport::default();

        map.retain(|filename, entry| {
            if !entry.file_path.exists() {
                debug!("Dropping orphaned entry {}", filename);
                report.orphaned.push(filename.clone());
                return false;
            }
            if now - entry.retention_start() <= self.window {
                report.retained += 1;
                return true;
            }
            match fs::remove_file(&entry.file_path) {
                Ok(()) => {
                    info!("Expired certificate {}", filename);
                    report.expired.push(filename.clone());
                    false
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", entry.file_path.display(), e);
                    report.retained += 1;
                    true
                }
            }
        });

        if report.removed() > 0 {
            self.save(&map)?;
        }
        Ok(report)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Result<BTreeMap<String, CertificateEntry>> {
        let path = self.metadata_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                let aside = path.with_extension(format!(
                    "json.corrupt-{}",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                warn!(
                    "Unreadable metadata {} ({}); moved to {} and rebuilding from the directory",
                    path.display(),
                    e,
                    aside.display()
                );
                fs::rename(&path, &aside)?;
                let map = self.rebuild()?;
                self.save(&map)?;
                Ok(map)
            }
        }
    }

    /// Re-track every PDF in the directory, aged from its modification time.
    fn rebuild(&self) -> Result<BTreeMap<String, CertificateEntry>> {
        let mut map = BTreeMap::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            let is_pdf = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
            if !is_pdf || !dirent.file_type()?.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let created_at = dirent
                .metadata()?
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            map.insert(
                name.to_string(),
                CertificateEntry {
                    created_at,
                    webhook_delivered: false,
                    webhook_delivered_at: None,
                    customer_label: String::new(),
                    product_count: 0,
                    file_path: path.clone(),
                },
            );
        }
        info!("Rebuilt metadata with {} certificate(s)", map.len());
        Ok(map)
    }

    fn save(&self, map: &BTreeMap<String, CertificateEntry>) -> Result<()> {
        let path = self.metadata_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(feature = "async")]
pub mod task {
    use super::*;
    use std::sync::Arc;

    /// Run a cleanup pass on a blocking thread.
    pub async fn cleanup(tracker: Arc<RetentionTracker>) -> Result<CleanupReport> {
        tokio::task::spawn_blocking(move || tracker.cleanup())
            .await
            .map_err(|e| Error::Join(e.to_string()))?
    }

    /// Spawn a task that runs a cleanup pass every `every`.
    /// The first pass runs immediately.
    pub fn spawn_cleanup_task(
        tracker: Arc<RetentionTracker>,
        every: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match cleanup(tracker.clone()).await {
                    Ok(report) if report.removed() > 0 => info!(
                        "Retention pass removed {} expired, {} orphaned",
                        report.expired.len(),
                        report.orphaned.len()
                    ),
                    Ok(_) => debug!("Retention pass: nothing to remove"),
                    Err(e) => warn!("Retention pass failed: {}", e),
                }
            }
        })
    }
}
