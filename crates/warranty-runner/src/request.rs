//! Request and result model for one registration run.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input to one automation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub products: Vec<Product>,
    /// `MM/DD/YYYY`; only checked for presence.
    pub installation_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<Customer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealer: Option<Dealer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub serial: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub address1: String,
    pub zip_postal: String,
    pub city: String,
    pub state_province: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dealer {
    pub dealer_zip: String,
    pub dealer_name: String,
    pub dealer_address: String,
    pub dealer_city: String,
    pub dealer_state: String,
    pub dealer_phone: String,
}

fn norm(s: &str) -> String {
    s.trim().to_uppercase()
}

impl Customer {
    fn normalized(&self) -> Self {
        Self {
            first_name: norm(&self.first_name),
            last_name: norm(&self.last_name),
            phone: norm(&self.phone),
            email: norm(&self.email),
            address1: norm(&self.address1),
            zip_postal: norm(&self.zip_postal),
            city: norm(&self.city),
            state_province: norm(&self.state_province),
        }
    }

    /// Short label used in logs and certificate metadata.
    pub fn label(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl Dealer {
    fn normalized(&self) -> Self {
        Self {
            dealer_zip: norm(&self.dealer_zip),
            dealer_name: norm(&self.dealer_name),
            dealer_address: norm(&self.dealer_address),
            dealer_city: norm(&self.dealer_city),
            dealer_state: norm(&self.dealer_state),
            dealer_phone: norm(&self.dealer_phone),
        }
    }
}

impl RegistrationRequest {
    /// Trimmed, upper-cased copy with empty products dropped.
    ///
    /// Duplicate serials are kept; the remote form does its own duplicate check.
    pub fn normalized(&self) -> Self {
        Self {
            products: self
                .products
                .iter()
                .map(|p| Product {
                    serial: norm(&p.serial),
                    model: norm(&p.model),
                })
                .filter(|p| !p.serial.is_empty())
                .collect(),
            installation_date: self.installation_date.trim().to_string(),
            customer: self.customer.as_ref().map(Customer::normalized),
            dealer: self.dealer.as_ref().map(Dealer::normalized),
        }
    }

    /// Presence checks on a normalized request.
    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one product with a serial is required".into(),
            ));
        }
        for (i, p) in self.products.iter().enumerate() {
            if p.model.is_empty() {
                return Err(Error::InvalidRequest(format!(
                    "products[{}].model is required",
                    i
                )));
            }
        }
        if self.installation_date.is_empty() {
            return Err(Error::InvalidRequest("installationDate is required".into()));
        }
        if let Some(c) = &self.customer {
            let required = [
                ("firstName", &c.first_name),
                ("lastName", &c.last_name),
                ("phone", &c.phone),
                ("email", &c.email),
                ("address1", &c.address1),
                ("zipPostal", &c.zip_postal),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    return Err(Error::InvalidRequest(format!(
                        "customer.{} is required",
                        field
                    )));
                }
            }
        } else if self.dealer.is_some() {
            return Err(Error::InvalidRequest(
                "dealer details require customer details".into(),
            ));
        }
        Ok(())
    }

    pub fn customer_label(&self) -> Option<String> {
        self.customer.as_ref().map(Customer::label)
    }
}

/// Caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AlreadyRegistered,
    InvalidSerial,
    InvalidRequest,
    NotFound,
    AutomationError,
    ResourceTeardown,
}

impl ErrorKind {
    /// Code returned to webhook callers.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorKind::InvalidSerial => "INVALID_SERIAL",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::NotFound => "ELEMENT_NOT_FOUND",
            ErrorKind::AutomationError | ErrorKind::ResourceTeardown => "AUTOMATION_FAILED",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::AlreadyRegistered | ErrorKind::InvalidSerial | ErrorKind::InvalidRequest
        )
    }
}

/// Where a saved certificate lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRef {
    pub filename: String,
    pub file_path: PathBuf,
}

/// Output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RegistrationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            timestamp: Utc::now(),
            certificate: None,
            error_kind: None,
            error_code: None,
            details: None,
        }
    }

    pub fn success_with_certificate(message: impl Into<String>, certificate: CertificateRef) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::success(message)
        }
    }

    pub fn failure(err: &Error) -> Self {
        let kind = err.kind();
        let details = match err {
            Error::AlreadyRegistered(serial) | Error::InvalidSerial(serial) => {
                Some(format!("serial: {}", serial))
            }
            Error::NotFound { tried, .. } => Some(format!("tried: {}", tried.join(", "))),
            _ => None,
        };
        Self {
            success: false,
            message: err.to_string(),
            timestamp: Utc::now(),
            certificate: None,
            error_kind: Some(kind),
            error_code: Some(kind.code().to_string()),
            details,
        }
    }

    /// The error kind, if this is a failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }
}
