//! Detect and clear dialogs that the form throws up at unpredictable moments.

use super::driver::Gesture;
use super::interact::FormFiller;
use super::locator::LocateOptions;
use crate::config::names::*;
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Known interruptions, each with a detector and an action target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    CookieConsent,
    /// Dismissing this one can open a popup window.
    ContractorOptOut,
    AddressConfirmation,
    Acknowledgement,
    FinalConfirmation,
}

impl OverlayKind {
    pub const ALL: [OverlayKind; 5] = [
        OverlayKind::CookieConsent,
        OverlayKind::ContractorOptOut,
        OverlayKind::AddressConfirmation,
        OverlayKind::Acknowledgement,
        OverlayKind::FinalConfirmation,
    ];

    /// Logical name whose presence means the overlay is showing.
    pub fn detector(&self) -> &'static str {
        match self {
            OverlayKind::CookieConsent => COOKIE_BANNER,
            OverlayKind::ContractorOptOut => CONTRACTOR_DIALOG,
            OverlayKind::AddressConfirmation => ADDRESS_DIALOG,
            OverlayKind::Acknowledgement => ACK_DIALOG,
            OverlayKind::FinalConfirmation => CONFIRM_DIALOG,
        }
    }

    /// Logical name of the control that clears it.
    pub fn action(&self) -> &'static str {
        match self {
            OverlayKind::CookieConsent => COOKIE_ACCEPT,
            OverlayKind::ContractorOptOut => CONTRACTOR_DISMISS,
            OverlayKind::AddressConfirmation => ADDRESS_CONFIRM,
            OverlayKind::Acknowledgement => ACK_OK,
            OverlayKind::FinalConfirmation => CONFIRM_YES,
        }
    }

    pub fn spawns_popup(&self) -> bool {
        matches!(self, OverlayKind::ContractorOptOut)
    }
}

pub struct OverlayResolver<'a> {
    filler: FormFiller<'a>,
    max_rounds: u32,
}

impl<'a> OverlayResolver<'a> {
    pub fn new(filler: FormFiller<'a>, max_rounds: u32) -> Self {
        Self {
            filler,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Which of `kinds` is showing, checked together for up to `timeout_ms`.
    pub async fn detect(&self, kinds: &[OverlayKind], timeout_ms: u64) -> Option<OverlayKind> {
        let detectors: Vec<&str> = kinds.iter().map(|k| k.detector()).collect();
        self.filler
            .locator()
            .probe_any(&detectors, timeout_ms)
            .await
            .map(|(which, _)| kinds[which])
    }

    /// Clear overlays of the given kinds until none shows up within
    /// `timeout_ms`, for at most `max_rounds` rounds. Returns how many were handled.
    pub async fn resolve_kinds(&self, kinds: &[OverlayKind], timeout_ms: u64) -> Result<usize> {
        let mut handled = 0;
        for round in 1..=self.max_rounds {
            let Some(kind) = self.detect(kinds, timeout_ms).await else {
                debug!("overlay probe: nothing showing (round {})", round);
                return Ok(handled);
            };
            if self.handle(kind).await? {
                handled += 1;
            }
        }
        warn!(
            "overlay resolver stopped after {} rounds; a dialog may still be open",
            self.max_rounds
        );
        Ok(handled)
    }

    /// Clear any known overlay.
    pub async fn resolve_pending(&self, timeout_ms: u64) -> Result<usize> {
        self.resolve_kinds(&OverlayKind::ALL, timeout_ms).await
    }

    /// Returns false if the overlay vanished before its action could be found.
    async fn handle(&self, kind: OverlayKind) -> Result<bool> {
        let locator = self.filler.locator();
        let timeouts = locator.timeouts();
        let opts = LocateOptions::new(timeouts.probe_ms).quiet();

        match locator.engage(kind.action(), opts, &Gesture::Click).await {
            Ok(el) => info!("overlay: {:?} cleared via {}", kind, el.strategy),
            Err(Error::NotFound { .. }) => {
                debug!("overlay: {:?} vanished before it could be cleared", kind);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        self.filler.settle().await;

        if kind.spawns_popup() {
            let driver = locator.driver();
            driver.pause(timeouts.popup_grace_ms).await;
            match driver.close_popups().await {
                Ok(0) => {}
                Ok(n) => debug!("overlay: closed {} popup(s) after {:?}", n, kind),
                Err(e) => warn!("overlay: failed to close popups: {}", e),
            }
        }
        Ok(true)
    }
}
