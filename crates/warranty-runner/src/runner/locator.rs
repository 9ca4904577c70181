//! Resolve logical names to live elements by walking their strategy lists.

use super::driver::{Gesture, PageDriver, Resolved};
use crate::config::{Pick, SelectorTable, Strategy, Timeouts};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Options for one locate call.
#[derive(Debug, Clone, Copy)]
pub struct LocateOptions {
    /// Overall budget across all strategies.
    pub timeout_ms: u64,
    pub require_enabled: bool,
    pub pick: Pick,
    /// Skip the diagnostic screenshot when nothing matches.
    pub quiet: bool,
}

impl LocateOptions {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            require_enabled: true,
            pick: Pick::First,
            quiet: false,
        }
    }

    pub fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }

    pub fn require_enabled(mut self, yes: bool) -> Self {
        self.require_enabled = yes;
        self
    }

    /// A miss is an expected outcome for the caller, not a failure.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// What a successful locate found, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub name: String,
    pub strategy: Strategy,
    /// Position of the winning strategy in the list (0 = preferred).
    pub strategy_index: usize,
    pub selector: String,
    pub tag: String,
    /// The gesture only succeeded through the forced path.
    pub forced: bool,
}

impl Located {
    fn new(name: &str, index: usize, strategy: &Strategy, el: Resolved) -> Self {
        Self {
            name: name.to_string(),
            strategy: strategy.clone(),
            strategy_index: index,
            selector: el.selector,
            tag: el.tag,
            forced: false,
        }
    }
}

#[derive(Clone, Copy)]
pub struct Locator<'a> {
    driver: &'a dyn PageDriver,
    table: &'a SelectorTable,
    timeouts: &'a Timeouts,
}

impl<'a> Locator<'a> {
    pub fn new(driver: &'a dyn PageDriver, table: &'a SelectorTable, timeouts: &'a Timeouts) -> Self {
        Self {
            driver,
            table,
            timeouts,
        }
    }

    pub fn driver(&self) -> &'a dyn PageDriver {
        self.driver
    }

    pub fn timeouts(&self) -> &'a Timeouts {
        self.timeouts
    }

    /// Find a ready element for `name` without touching it.
    pub async fn locate(&self, name: &str, opts: LocateOptions) -> Result<Located> {
        self.walk(name, opts, None).await
    }

    /// Find `name` and apply `gesture`, falling back through strategies.
    pub async fn engage(&self, name: &str, opts: LocateOptions, gesture: &Gesture) -> Result<Located> {
        self.walk(name, opts, Some(gesture)).await
    }

    async fn walk(&self, name: &str, opts: LocateOptions, gesture: Option<&Gesture>) -> Result<Located> {
        let strategies = self.table.strategies(name)?;
        let mut spent = 0u64;
        let mut tried = Vec::with_capacity(strategies.len());

        for (index, strategy) in strategies.iter().enumerate() {
            tried.push(strategy.to_string());
            let budget = self
                .timeouts
                .candidate_ms
                .min(opts.timeout_ms.saturating_sub(spent));
            let (found, waited) = self.wait_ready(strategy, opts, budget).await;
            spent += waited;

            let Some(el) = found else {
                debug!("{}: nothing ready for {}", name, strategy);
                continue;
            };
            let mut located = Located::new(name, index, strategy, el);

            if let Some(gesture) = gesture {
                match self.interact(&located.selector, gesture).await {
                    Ok(forced) => located.forced = forced,
                    Err(e) => {
                        warn!("{}: {} via {} failed: {}", name, gesture.name(), strategy, e);
                        continue;
                    }
                }
            }

            if index > 0 {
                info!("{}: matched fallback strategy #{} ({})", name, index, strategy);
            } else {
                debug!("{}: matched {}", name, strategy);
            }
            return Ok(located);
        }

        if !opts.quiet {
            self.driver
                .capture(&format!("not-found-{}", slug(name)))
                .await;
        }
        Err(Error::not_found(name, tried))
    }

    /// Poll one strategy until it yields a visible (and enabled) element.
    /// Returns the element and the time spent waiting.
    async fn wait_ready(
        &self,
        strategy: &Strategy,
        opts: LocateOptions,
        budget_ms: u64,
    ) -> (Option<Resolved>, u64) {
        let poll = self.timeouts.poll_ms.max(1);
        let polls = budget_ms / poll;
        let mut waited = 0;

        for attempt in 0..=polls {
            match self.driver.resolve(strategy, opts.pick).await {
                Ok(Some(el)) if el.visible && (el.enabled || !opts.require_enabled) => {
                    return (Some(el), waited);
                }
                Ok(Some(el)) => debug!(
                    "{} present but not ready (visible: {}, enabled: {})",
                    strategy, el.visible, el.enabled
                ),
                Ok(None) => {}
                Err(e) => debug!("{} lookup failed: {}", strategy, e),
            }
            if attempt < polls {
                self.driver.pause(poll).await;
                waited += poll;
            }
        }
        (None, waited)
    }

    /// Direct gesture first; once, a forced one. Returns whether force was needed.
    async fn interact(&self, selector: &str, gesture: &Gesture) -> Result<bool> {
        if matches!(gesture, Gesture::Click | Gesture::Check(_)) {
            if let Err(e) = self.driver.scroll_into_view(selector).await {
                debug!("scroll_into_view {} failed: {}", selector, e);
            }
        }
        match self.driver.perform(selector, gesture).await {
            Ok(()) => Ok(false),
            Err(e) => {
                debug!("{} on {} failed ({}), forcing", gesture.name(), selector, e);
                self.driver.force(selector, gesture).await?;
                Ok(true)
            }
        }
    }

    /// Look for any of `names` for up to `timeout_ms`. Absence is not an error.
    ///
    /// All names are checked on every poll, so the wait is bounded by
    /// `timeout_ms` no matter how many names are probed.
    pub async fn probe_any(&self, names: &[&str], timeout_ms: u64) -> Option<(usize, Located)> {
        let poll = self.timeouts.poll_ms.max(1);
        let polls = timeout_ms / poll;

        for attempt in 0..=polls {
            for (which, name) in names.iter().enumerate() {
                let Some(strategies) = self.table.get(name) else {
                    debug!("probe: no strategies for {}", name);
                    continue;
                };
                for (index, strategy) in strategies.iter().enumerate() {
                    match self.driver.resolve(strategy, Pick::First).await {
                        Ok(Some(el)) if el.visible => {
                            debug!("probe: {} present via {}", name, strategy);
                            return Some((which, Located::new(name, index, strategy, el)));
                        }
                        Ok(_) => {}
                        Err(e) => debug!("probe: {} lookup failed: {}", strategy, e),
                    }
                }
            }
            if attempt < polls {
                self.driver.pause(poll).await;
            }
        }
        None
    }
}

fn slug(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    s.split('-').filter(|p| !p.is_empty()).collect::<Vec<_>>().join("-")
}
