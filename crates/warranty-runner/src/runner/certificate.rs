//! Certificate naming and persistence.

use crate::request::{CertificateRef, RegistrationRequest};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// A file captured from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Name the site offered, possibly empty.
    pub suggested_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));
    let cleaned = re.replace_all(name.trim(), "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '_' || c == '.');
    if cleaned.is_empty() {
        "certificate".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Pick the on-disk filename for a certificate.
pub fn certificate_filename(
    download: &Download,
    request: &RegistrationRequest,
    now: DateTime<Utc>,
) -> String {
    let suggested = download.suggested_name.trim();
    if suggested.to_lowercase().ends_with(".pdf") {
        return sanitize(suggested);
    }
    let who = request
        .customer
        .as_ref()
        .map(|c| c.last_name.clone())
        .filter(|s| !s.is_empty())
        .or_else(|| request.products.first().map(|p| p.serial.clone()))
        .unwrap_or_else(|| "UNKNOWN".into());
    sanitize(&format!(
        "warranty-certificate-{}-{}.pdf",
        who,
        now.format("%Y%m%d%H%M%S")
    ))
}

/// Write the download into `dir`, never overwriting an existing file.
///
/// The name is claimed with `create_new`, so concurrent saves of the same
/// suggested name end up as `name.pdf`, `name-1.pdf`, ...
pub fn save(dir: &Path, download: &Download, request: &RegistrationRequest) -> Result<CertificateRef> {
    if download.bytes.is_empty() {
        return Err(Error::Automation("downloaded certificate is empty".into()));
    }
    std::fs::create_dir_all(dir)?;

    let wanted = certificate_filename(download, request, Utc::now());
    let (filename, mut file) = create_unique(dir, &wanted)?;
    let file_path = dir.join(&filename);
    file.write_all(&download.bytes)?;
    file.sync_all()?;
    info!(
        "Saved certificate: {} ({} bytes)",
        file_path.display(),
        download.bytes.len()
    );

    Ok(CertificateRef {
        filename,
        file_path,
    })
}

fn create_unique(dir: &Path, filename: &str) -> Result<(String, File)> {
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (filename, String::new()),
    };
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            filename.to_string()
        } else {
            format!("{}-{}{}", stem, n, ext)
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(&candidate))
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read back a saved certificate.
pub fn load(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

/// Copy a saved certificate to `dest` for the caller. Returns the byte count.
pub fn export(cert: &CertificateRef, dest: &Path) -> Result<usize> {
    let bytes = load(&cert.file_path)?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, &bytes)?;
    Ok(bytes.len())
}
