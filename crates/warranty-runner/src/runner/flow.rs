//! The registration protocol as a strictly linear state machine.

use super::certificate::Download;
use super::driver::PageDriver;
use super::interact::{FormFiller, TypeOptions};
use super::locator::Locator;
use super::overlay::{OverlayKind, OverlayResolver};
use crate::config::names::*;
use crate::config::{Config, Pick, SelectorTable, Timeouts};
use crate::request::{Customer, Dealer, RegistrationRequest};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    NavigateAndSelectType,
    EnterProducts,
    EnterInstallMetadata,
    AdvancePage,
    EnterCustomerDetails,
    EnterDealerDetails,
    CompleteRegistration,
    Done,
}

impl FlowState {
    /// The only state allowed to follow this one.
    pub fn next(&self) -> Option<FlowState> {
        use FlowState::*;
        match self {
            Start => Some(NavigateAndSelectType),
            NavigateAndSelectType => Some(EnterProducts),
            EnterProducts => Some(EnterInstallMetadata),
            EnterInstallMetadata => Some(AdvancePage),
            AdvancePage => Some(EnterCustomerDetails),
            EnterCustomerDetails => Some(EnterDealerDetails),
            EnterDealerDetails => Some(CompleteRegistration),
            CompleteRegistration => Some(Done),
            Done => None,
        }
    }

    pub fn label(&self) -> &'static str {
        use FlowState::*;
        match self {
            Start => "start",
            NavigateAndSelectType => "navigate",
            EnterProducts => "products",
            EnterInstallMetadata => "install-metadata",
            AdvancePage => "advance-page",
            EnterCustomerDetails => "customer",
            EnterDealerDetails => "dealer",
            CompleteRegistration => "complete",
            Done => "done",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How far a run got and what it produced.
#[derive(Debug)]
pub struct FlowOutcome {
    pub reached: FlowState,
    pub certificate: Option<Download>,
    pub overlays_handled: usize,
}

/// Drives one registration through a page.
pub struct RegistrationFlow<'a> {
    driver: &'a dyn PageDriver,
    url: &'a str,
    timeouts: &'a Timeouts,
    filler: FormFiller<'a>,
    overlays: OverlayResolver<'a>,
    state: FlowState,
    overlays_handled: usize,
}

impl<'a> RegistrationFlow<'a> {
    pub fn new(driver: &'a dyn PageDriver, table: &'a SelectorTable, config: &'a Config) -> Self {
        let locator = Locator::new(driver, table, &config.timeouts);
        let filler = FormFiller::new(locator);
        Self {
            driver,
            url: &config.target.url,
            timeouts: &config.timeouts,
            filler,
            overlays: OverlayResolver::new(filler, config.overlays.max_rounds),
            state: FlowState::Start,
            overlays_handled: 0,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Run every step in order. The first failure aborts the run after a
    /// diagnostic screenshot.
    pub async fn run(&mut self, request: &RegistrationRequest) -> Result<FlowOutcome> {
        match self.execute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Run failed in state {}: {}", self.state, e);
                // the locator already captured one for NotFound
                if !matches!(e, Error::NotFound { .. }) {
                    self.driver
                        .capture(&format!("failed-{}", self.state.label()))
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn execute(&mut self, request: &RegistrationRequest) -> Result<FlowOutcome> {
        self.enter(FlowState::NavigateAndSelectType)?;
        self.navigate_and_select_type().await?;

        self.enter(FlowState::EnterProducts)?;
        self.enter_products(request).await?;

        self.enter(FlowState::EnterInstallMetadata)?;
        self.enter_install_metadata(request).await?;

        let Some(customer) = &request.customer else {
            info!("No customer details; stopping after install metadata");
            return Ok(self.outcome(None));
        };

        self.enter(FlowState::AdvancePage)?;
        self.advance_page().await?;

        self.enter(FlowState::EnterCustomerDetails)?;
        self.enter_customer_details(customer).await?;

        self.enter(FlowState::EnterDealerDetails)?;
        match &request.dealer {
            Some(dealer) => self.enter_dealer_details(dealer).await?,
            None => debug!("No dealer details; skipping"),
        }

        self.enter(FlowState::CompleteRegistration)?;
        let certificate = self.complete_registration().await?;

        self.enter(FlowState::Done)?;
        Ok(self.outcome(Some(certificate)))
    }

    fn enter(&mut self, to: FlowState) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(Error::Automation(format!(
                "illegal transition {} -> {}",
                self.state, to
            )));
        }
        info!("[{}] -> [{}]", self.state, to);
        self.state = to;
        Ok(())
    }

    fn outcome(&self, certificate: Option<Download>) -> FlowOutcome {
        FlowOutcome {
            reached: self.state,
            certificate,
            overlays_handled: self.overlays_handled,
        }
    }

    async fn probe_overlays(&mut self, kinds: &[OverlayKind]) -> Result<()> {
        let n = self
            .overlays
            .resolve_kinds(kinds, self.timeouts.probe_ms)
            .await?;
        self.overlays_handled += n;
        Ok(())
    }

    async fn navigate_and_select_type(&mut self) -> Result<()> {
        self.driver.goto(self.url).await?;
        self.filler.settle().await;
        self.probe_overlays(&[OverlayKind::CookieConsent]).await?;

        self.filler.check(REGISTERING_FOR_CUSTOMER, true).await?;
        self.filler.settle().await;
        Ok(())
    }

    async fn enter_products(&mut self, request: &RegistrationRequest) -> Result<()> {
        let total = request.products.len();
        for (i, product) in request.products.iter().enumerate() {
            let pick = if i == 0 {
                Pick::First
            } else {
                self.filler.click(ADD_PRODUCT, true).await?;
                Pick::Last
            };
            info!("Product {}/{}: serial {}", i + 1, total, product.serial);

            self.filler
                .type_text(
                    SERIAL_NUMBER,
                    &product.serial,
                    TypeOptions::default().submit("Enter").pick(pick),
                )
                .await?;

            let notices = [ALREADY_REGISTERED_NOTICE, INVALID_SERIAL_NOTICE];
            if let Some((which, _)) = self
                .filler
                .locator()
                .probe_any(&notices, self.timeouts.probe_ms)
                .await
            {
                let serial = product.serial.clone();
                return Err(if which == 0 {
                    Error::AlreadyRegistered(serial)
                } else {
                    Error::InvalidSerial(serial)
                });
            }
        }
        Ok(())
    }

    async fn enter_install_metadata(&mut self, request: &RegistrationRequest) -> Result<()> {
        self.filler
            .type_text(
                INSTALLATION_DATE,
                &request.installation_date,
                TypeOptions::default().blur(),
            )
            .await?;
        self.filler.check(RESIDENTIAL, true).await?;
        self.filler.check(OWNER_OCCUPIED, true).await?;
        Ok(())
    }

    async fn advance_page(&mut self) -> Result<()> {
        self.filler.click(NEXT, true).await?;
        self.filler.click(CONTINUE, true).await?;
        Ok(())
    }

    async fn enter_customer_details(&mut self, customer: &Customer) -> Result<()> {
        let opts = TypeOptions::default();
        self.filler
            .type_text(FIRST_NAME, &customer.first_name, opts)
            .await?;
        self.filler
            .type_text(LAST_NAME, &customer.last_name, opts)
            .await?;
        self.filler.type_text(PHONE, &customer.phone, opts).await?;
        self.filler.type_text(EMAIL, &customer.email, opts).await?;
        self.filler
            .type_text(ADDRESS, &customer.address1, opts)
            .await?;
        self.filler
            .type_text(ZIP, &customer.zip_postal, opts)
            .await?;

        // the form looks the zip up and may fill city/state itself
        self.driver.pause(self.timeouts.autofill_wait_ms).await;
        self.fill_if_blank(CITY, &customer.city).await?;
        self.fill_if_blank(STATE, &customer.state_province).await?;

        self.filler.check(CONSENT, true).await?;
        self.filler.click(NEXT, true).await?;
        Ok(())
    }

    async fn fill_if_blank(&mut self, name: &str, value: &str) -> Result<()> {
        let current = self.filler.read(name).await?;
        if !current.trim().is_empty() {
            debug!("{} autofilled; keeping it", name);
            return Ok(());
        }
        if value.is_empty() {
            debug!("{} blank and nothing to write", name);
            return Ok(());
        }
        self.filler
            .set_text_or_select(name, value, TypeOptions::default())
            .await?;
        Ok(())
    }

    async fn enter_dealer_details(&mut self, dealer: &Dealer) -> Result<()> {
        if !dealer.dealer_zip.is_empty() {
            // Enter triggers the dealer lookup
            self.filler
                .type_text(
                    DEALER_ZIP,
                    &dealer.dealer_zip,
                    TypeOptions::default().submit("Enter"),
                )
                .await?;
        }
        if !dealer.dealer_name.is_empty() {
            self.filler
                .type_text(
                    DEALER_NAME,
                    &dealer.dealer_name,
                    TypeOptions::default().blur(),
                )
                .await?;
        }

        let opts = TypeOptions::default();
        if !dealer.dealer_address.is_empty() {
            self.filler
                .type_text(DEALER_ADDRESS, &dealer.dealer_address, opts)
                .await?;
        }
        if !dealer.dealer_city.is_empty() {
            self.filler
                .type_text(DEALER_CITY, &dealer.dealer_city, opts)
                .await?;
        }
        if !dealer.dealer_state.is_empty() {
            self.filler
                .set_text_or_select(DEALER_STATE, &dealer.dealer_state, opts)
                .await?;
        }
        if !dealer.dealer_phone.is_empty() {
            self.filler
                .type_text(DEALER_PHONE, &dealer.dealer_phone, opts)
                .await?;
        }
        Ok(())
    }

    async fn complete_registration(&mut self) -> Result<Download> {
        self.filler.click(REGISTER, true).await?;
        self.probe_overlays(&[OverlayKind::AddressConfirmation])
            .await?;

        self.filler.click(AFFIRM, true).await?;
        self.probe_overlays(&[OverlayKind::AddressConfirmation])
            .await?;

        self.filler.click(FINAL_YES, true).await?;
        let drained = self
            .overlays
            .resolve_pending(self.timeouts.probe_ms)
            .await?;
        self.overlays_handled += drained;
        if drained > 0 {
            info!("Cleared {} dialog(s) before download", drained);
        }

        self.driver.arm_download().await?;
        self.filler.click(DOWNLOAD_CERTIFICATE, false).await?;
        self.await_download().await
    }

    async fn await_download(&self) -> Result<Download> {
        let poll = self.timeouts.poll_ms.max(1);
        let polls = self.timeouts.download_ms / poll;
        for attempt in 0..=polls {
            if let Some(download) = self.driver.take_download().await? {
                info!(
                    "Certificate downloaded ({} bytes, {})",
                    download.bytes.len(),
                    if download.mime.is_empty() {
                        "unknown type"
                    } else {
                        download.mime.as_str()
                    }
                );
                return Ok(download);
            }
            if attempt < polls {
                self.driver.pause(poll).await;
            }
        }
        Err(Error::Timeout(format!(
            "no certificate download within {}ms",
            self.timeouts.download_ms
        )))
    }
}
