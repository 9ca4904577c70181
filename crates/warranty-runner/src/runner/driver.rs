//! The seam between flow logic and a live page.

use super::certificate::Download;
use crate::config::{Pick, Strategy};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// An element a strategy matched, as reported by the page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resolved {
    /// Unique CSS path usable for follow-up calls.
    pub selector: String,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
}

/// One interaction with a located element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    Click,
    /// Clear, then write.
    Fill(String),
    /// Write without clearing.
    Type(String),
    /// Set a checkbox or radio to the given state.
    Check(bool),
    /// Choose an option by value or visible text.
    Select(String),
}

impl Gesture {
    pub fn name(&self) -> &'static str {
        match self {
            Gesture::Click => "click",
            Gesture::Fill(_) => "fill",
            Gesture::Type(_) => "type",
            Gesture::Check(_) => "check",
            Gesture::Select(_) => "select",
        }
    }
}

/// Everything the flow needs from a browser page.
///
/// `Session` implements this over eoka; tests use a scripted page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Evaluate one strategy right now. `None` means no match.
    async fn resolve(&self, strategy: &Strategy, pick: Pick) -> Result<Option<Resolved>>;

    async fn scroll_into_view(&self, selector: &str) -> Result<()>;

    /// Normal interaction with hit-testing. Fails if the element is occluded.
    async fn perform(&self, selector: &str, gesture: &Gesture) -> Result<()>;

    /// Interaction that bypasses hit-testing (DOM-level click / value set).
    async fn force(&self, selector: &str, gesture: &Gesture) -> Result<()>;

    async fn read_value(&self, selector: &str) -> Result<String>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;

    async fn blur(&self, selector: &str) -> Result<()>;

    /// Wait for the network to go quiet for `idle_ms`, up to `timeout_ms`.
    async fn settle(&self, idle_ms: u64, timeout_ms: u64) -> Result<()>;

    async fn pause(&self, ms: u64);

    /// Close every tab except the main page. Returns how many were closed.
    async fn close_popups(&self) -> Result<usize>;

    /// Start intercepting the next file download.
    async fn arm_download(&self) -> Result<()>;

    /// The intercepted download, if it has arrived.
    async fn take_download(&self) -> Result<Option<Download>>;

    /// Best-effort screenshot tagged with `label`.
    async fn capture(&self, label: &str) -> Option<PathBuf>;
}
