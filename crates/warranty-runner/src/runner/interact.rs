//! Field-level operations built on the locator.

use super::driver::Gesture;
use super::locator::{LocateOptions, Located, Locator};
use crate::config::Pick;
use crate::Result;
use tracing::{debug, info, warn};

/// Options for [`FormFiller::type_text`].
#[derive(Debug, Clone, Copy)]
pub struct TypeOptions {
    /// Clear the field before writing.
    pub clear: bool,
    /// Read the value back and rewrite once on mismatch.
    pub verify: bool,
    /// Key to press after writing (e.g. "Enter").
    pub submit: Option<&'static str>,
    /// Blur the field after writing.
    pub blur: bool,
    /// Wait for network settle after writing.
    pub settle: bool,
    pub pick: Pick,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            clear: true,
            verify: true,
            submit: None,
            blur: false,
            settle: true,
            pick: Pick::First,
        }
    }
}

impl TypeOptions {
    pub fn submit(mut self, key: &'static str) -> Self {
        self.submit = Some(key);
        self
    }

    pub fn blur(mut self) -> Self {
        self.blur = true;
        self
    }

    pub fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }
}

/// Types, clicks and selects by logical name.
#[derive(Clone, Copy)]
pub struct FormFiller<'a> {
    locator: Locator<'a>,
}

impl<'a> FormFiller<'a> {
    pub fn new(locator: Locator<'a>) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &Locator<'a> {
        &self.locator
    }

    fn opts(&self) -> LocateOptions {
        LocateOptions::new(self.locator.timeouts().default_ms)
    }

    /// Wait for network quiet. Never fails; a noisy page just costs the timeout.
    pub async fn settle(&self) {
        let t = self.locator.timeouts();
        if let Err(e) = self
            .locator
            .driver()
            .settle(t.settle_idle_ms, t.default_ms)
            .await
        {
            debug!("settle did not complete: {}", e);
        }
    }

    /// Locate, write, settle, then optionally verify, submit and blur.
    pub async fn type_text(&self, name: &str, value: &str, opts: TypeOptions) -> Result<Located> {
        let gesture = if opts.clear {
            Gesture::Fill(value.to_string())
        } else {
            Gesture::Type(value.to_string())
        };
        let el = self
            .locator
            .engage(name, self.opts().pick(opts.pick), &gesture)
            .await?;
        info!("type: {} ({} chars)", name, value.chars().count());
        if opts.settle {
            self.settle().await;
        }

        if opts.verify {
            self.verify(&el, value).await?;
        }

        let driver = self.locator.driver();
        if let Some(key) = opts.submit {
            debug!("press {} in {}", key, name);
            driver.press_key(&el.selector, key).await?;
        }
        if opts.blur {
            driver.blur(&el.selector).await?;
        }
        if opts.settle && (opts.submit.is_some() || opts.blur) {
            self.settle().await;
        }
        Ok(el)
    }

    /// Read back, rewrite exactly once on mismatch, then accept what the field shows.
    async fn verify(&self, el: &Located, want: &str) -> Result<()> {
        let driver = self.locator.driver();
        let got = driver.read_value(&el.selector).await?;
        if got.trim() == want.trim() {
            return Ok(());
        }

        warn!(
            "{}: value did not stick ({} chars vs {}), rewriting once",
            el.name,
            got.chars().count(),
            want.chars().count()
        );
        let rewrite = Gesture::Fill(want.to_string());
        if driver.perform(&el.selector, &rewrite).await.is_err() {
            driver.force(&el.selector, &rewrite).await?;
        }
        self.settle().await;

        let second = driver.read_value(&el.selector).await?;
        if second.trim() != want.trim() {
            info!("{}: accepting value as reformatted by the page", el.name);
        }
        Ok(())
    }

    /// Locate, scroll, click, and optionally wait for the page to settle.
    pub async fn click(&self, name: &str, wait_settle: bool) -> Result<Located> {
        let el = self.locator.engage(name, self.opts(), &Gesture::Click).await?;
        info!("click: {}", name);
        if wait_settle {
            self.settle().await;
        }
        Ok(el)
    }

    pub async fn select_option(&self, name: &str, value: &str) -> Result<Located> {
        let el = self
            .locator
            .engage(name, self.opts(), &Gesture::Select(value.to_string()))
            .await?;
        info!("select: {} = '{}'", name, value);
        self.settle().await;
        Ok(el)
    }

    /// Set a checkbox or radio.
    pub async fn check(&self, name: &str, on: bool) -> Result<Located> {
        let el = self
            .locator
            .engage(name, self.opts(), &Gesture::Check(on))
            .await?;
        info!("check: {} = {}", name, on);
        Ok(el)
    }

    /// Current value of a field.
    pub async fn read(&self, name: &str) -> Result<String> {
        let el = self
            .locator
            .locate(name, self.opts().require_enabled(false))
            .await?;
        self.locator.driver().read_value(&el.selector).await
    }

    /// Write into a field that may render as a `<select>` or a text input.
    pub async fn set_text_or_select(&self, name: &str, value: &str, opts: TypeOptions) -> Result<Located> {
        let el = self.locator.locate(name, self.opts()).await?;
        if el.tag == "select" {
            self.select_option(name, value).await
        } else {
            self.type_text(name, value, opts).await
        }
    }
}
