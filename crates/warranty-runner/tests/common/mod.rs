//! A scripted in-memory page for exercising the flow without a browser.
//!
//! Strategies are matched by their config string (`role:button|Next`), so a
//! test decides exactly which strategy of a logical name "exists" on the page.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use warranty_runner::names::*;
use warranty_runner::{
    Config, Download, Error, Gesture, PageDriver, Params, Pick, Resolved, Result, SelectorTable,
    Strategy,
};

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub value: String,
    pub checked: bool,
    pub present: bool,
    pub visible: bool,
    pub enabled: bool,
    pub occluded: bool,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.into(),
            value: String::new(),
            checked: false,
            present: true,
            visible: true,
            enabled: true,
            occluded: false,
        }
    }
}

/// Side effects of an interaction.
#[derive(Debug, Clone)]
pub enum Reaction {
    Show(String),
    Hide(String),
    SetValue(String, String),
    OpenPopup,
    /// Deliver the certificate if the download hook is armed.
    Deliver,
}

#[derive(Default)]
struct State {
    elements: HashMap<String, Element>,
    bindings: HashMap<String, Vec<String>>,
    on_click: HashMap<String, Vec<Reaction>>,
    on_key: HashMap<String, Vec<Reaction>>,
    on_write: HashMap<String, Vec<Reaction>>,
    mangle_once: Vec<String>,
    events: Vec<(String, u64)>,
    captures: Vec<String>,
    paused_ms: u64,
    popups: usize,
    armed: bool,
    download: Option<Download>,
    pending: Option<Download>,
    url: Option<String>,
}

pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Every field the happy path needs, each bound to its preferred strategy.
    /// Notices and dialogs are registered but absent.
    pub fn registration_form() -> Self {
        let page = Self::new();
        let table = SelectorTable::builtin();
        let first = |name: &str| table.get(name).map(|s| s[0].to_string()).unwrap_or_default();

        let fields = [
            (REGISTERING_FOR_CUSTOMER, "input"),
            (SERIAL_NUMBER, "input"),
            (ADD_PRODUCT, "button"),
            (INSTALLATION_DATE, "input"),
            (RESIDENTIAL, "input"),
            (OWNER_OCCUPIED, "input"),
            (NEXT, "button"),
            (CONTINUE, "button"),
            (FIRST_NAME, "input"),
            (LAST_NAME, "input"),
            (PHONE, "input"),
            (EMAIL, "input"),
            (ADDRESS, "input"),
            (ZIP, "input"),
            (CITY, "input"),
            (STATE, "select"),
            (CONSENT, "input"),
            (DEALER_ZIP, "input"),
            (DEALER_NAME, "input"),
            (DEALER_ADDRESS, "input"),
            (DEALER_CITY, "input"),
            (DEALER_STATE, "select"),
            (DEALER_PHONE, "input"),
            (REGISTER, "button"),
            (AFFIRM, "button"),
            (FINAL_YES, "button"),
            (DOWNLOAD_CERTIFICATE, "button"),
        ];
        for (name, tag) in fields {
            page.add(&first(name), &selector_for(name), tag);
        }

        let absent = [
            ALREADY_REGISTERED_NOTICE,
            INVALID_SERIAL_NOTICE,
            COOKIE_BANNER,
            COOKIE_ACCEPT,
            CONTRACTOR_DIALOG,
            CONTRACTOR_DISMISS,
            ADDRESS_DIALOG,
            ADDRESS_CONFIRM,
            ACK_DIALOG,
            ACK_OK,
            CONFIRM_DIALOG,
            CONFIRM_YES,
        ];
        for name in absent {
            page.add(&first(name), &selector_for(name), "div");
            page.set_present(&selector_for(name), false);
        }

        // a second serial row appears after "Add Another Product"
        page.add(&first(SERIAL_NUMBER), "#serial-number-2", "input");
        page.set_present("#serial-number-2", false);
        page.on_click(&selector_for(ADD_PRODUCT), vec![Reaction::Show("#serial-number-2".into())]);

        page.on_click(&selector_for(DOWNLOAD_CERTIFICATE), vec![Reaction::Deliver]);
        page.set_download(Download {
            suggested_name: String::new(),
            mime: "application/pdf".into(),
            bytes: b"%PDF-1.7 certificate".to_vec(),
        });
        page
    }

    /// Bind `strategy` to an element, creating it if needed.
    pub fn add(&self, strategy: &str, selector: &str, tag: &str) {
        let mut s = self.state.lock().unwrap();
        s.elements
            .entry(selector.to_string())
            .or_insert_with(|| Element::new(tag));
        s.bindings
            .entry(strategy.to_string())
            .or_default()
            .push(selector.to_string());
    }

    /// Remove every binding of `strategy`.
    pub fn unbind(&self, strategy: &str) {
        self.state.lock().unwrap().bindings.remove(strategy);
    }

    pub fn update(&self, selector: &str, f: impl FnOnce(&mut Element)) {
        let mut s = self.state.lock().unwrap();
        if let Some(el) = s.elements.get_mut(selector) {
            f(el);
        }
    }

    pub fn set_present(&self, selector: &str, present: bool) {
        self.update(selector, |el| el.present = present);
    }

    pub fn on_click(&self, selector: &str, reactions: Vec<Reaction>) {
        self.state
            .lock()
            .unwrap()
            .on_click
            .insert(selector.to_string(), reactions);
    }

    pub fn on_key(&self, selector: &str, reactions: Vec<Reaction>) {
        self.state
            .lock()
            .unwrap()
            .on_key
            .insert(selector.to_string(), reactions);
    }

    pub fn on_write(&self, selector: &str, reactions: Vec<Reaction>) {
        self.state
            .lock()
            .unwrap()
            .on_write
            .insert(selector.to_string(), reactions);
    }

    /// The next write to `selector` drops its last character.
    pub fn mangle_once(&self, selector: &str) {
        self.state
            .lock()
            .unwrap()
            .mangle_once
            .push(selector.to_string());
    }

    pub fn set_download(&self, download: Download) {
        self.state.lock().unwrap().download = Some(download);
    }

    pub fn value(&self, selector: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .map(|e| e.value.clone())
            .unwrap_or_default()
    }

    pub fn checked(&self, selector: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(selector)
            .map(|e| e.checked)
            .unwrap_or(false)
    }

    pub fn events(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Total paused time when `event` happened.
    pub fn paused_at(&self, event: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|(e, _)| e == event)
            .map(|(_, at)| *at)
    }

    pub fn captures(&self) -> Vec<String> {
        self.state.lock().unwrap().captures.clone()
    }

    pub fn open_popups(&self) -> usize {
        self.state.lock().unwrap().popups
    }

    pub fn url(&self) -> Option<String> {
        self.state.lock().unwrap().url.clone()
    }
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

/// The selector the fake uses for a logical name's element.
pub fn selector_for(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("#{}", slug)
}

/// The config string of strategy `index` for `name` in the built-in table.
pub fn strategy(name: &str, index: usize) -> String {
    SelectorTable::builtin()
        .get(name)
        .and_then(|s| s.get(index))
        .map(|s| s.to_string())
        .unwrap_or_default()
}

impl State {
    fn log(&mut self, event: String) {
        let at = self.paused_ms;
        self.events.push((event, at));
    }

    fn element(&mut self, selector: &str) -> Result<&mut Element> {
        match self.elements.get_mut(selector) {
            Some(el) if el.present => Ok(el),
            _ => Err(Error::Automation(format!("{} disappeared", selector))),
        }
    }

    fn react(&mut self, reactions: Option<Vec<Reaction>>) {
        for reaction in reactions.unwrap_or_default() {
            match reaction {
                Reaction::Show(sel) => {
                    if let Some(el) = self.elements.get_mut(&sel) {
                        el.present = true;
                    }
                }
                Reaction::Hide(sel) => {
                    if let Some(el) = self.elements.get_mut(&sel) {
                        el.present = false;
                    }
                }
                Reaction::SetValue(sel, value) => {
                    if let Some(el) = self.elements.get_mut(&sel) {
                        el.value = value;
                    }
                }
                Reaction::OpenPopup => self.popups += 1,
                Reaction::Deliver => {
                    if self.armed {
                        self.pending = self.download.clone();
                    }
                }
            }
        }
    }

    fn write(&mut self, selector: &str, value: String) -> Result<()> {
        let mangle = self.mangle_once.iter().position(|s| s == selector);
        let stored = match mangle {
            Some(i) => {
                self.mangle_once.remove(i);
                let mut v = value.clone();
                v.pop();
                v
            }
            None => value,
        };
        self.element(selector)?.value = stored;
        let reactions = self.on_write.get(selector).cloned();
        self.react(reactions);
        Ok(())
    }

    fn apply(&mut self, selector: &str, gesture: &Gesture, forced: bool) -> Result<()> {
        let prefix = if forced { "force " } else { "" };
        {
            let el = self.element(selector)?;
            if !forced && el.occluded {
                return Err(Error::Automation(format!("{} is occluded", selector)));
            }
        }
        match gesture {
            Gesture::Click => {
                self.log(format!("{}click {}", prefix, selector));
                let reactions = self.on_click.get(selector).cloned();
                self.react(reactions);
            }
            Gesture::Fill(v) => {
                self.log(format!("{}fill {}={}", prefix, selector, v));
                self.write(selector, v.clone())?;
            }
            Gesture::Type(v) => {
                self.log(format!("{}type {}={}", prefix, selector, v));
                let current = self.element(selector)?.value.clone();
                self.write(selector, format!("{}{}", current, v))?;
            }
            Gesture::Check(on) => {
                self.log(format!("{}check {}={}", prefix, selector, on));
                self.element(selector)?.checked = *on;
            }
            Gesture::Select(v) => {
                self.log(format!("{}select {}={}", prefix, selector, v));
                self.write(selector, v.clone())?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.url = Some(url.to_string());
        s.log(format!("goto {}", url));
        Ok(())
    }

    async fn resolve(&self, strategy: &Strategy, pick: Pick) -> Result<Option<Resolved>> {
        let s = self.state.lock().unwrap();
        let Some(selectors) = s.bindings.get(&strategy.to_string()) else {
            return Ok(None);
        };
        let present: Vec<(&String, &Element)> = selectors
            .iter()
            .filter_map(|sel| s.elements.get(sel).map(|el| (sel, el)))
            .filter(|(_, el)| el.present)
            .collect();
        let shown: Vec<_> = present.iter().filter(|(_, el)| el.visible).cloned().collect();
        let pool = if shown.is_empty() { present } else { shown };
        let chosen = match pick {
            Pick::First => pool.first(),
            Pick::Last => pool.last(),
        };
        Ok(chosen.map(|(sel, el)| Resolved {
            selector: (*sel).clone(),
            tag: el.tag.clone(),
            text: String::new(),
            visible: el.visible,
            enabled: el.enabled,
        }))
    }

    async fn scroll_into_view(&self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn perform(&self, selector: &str, gesture: &Gesture) -> Result<()> {
        self.state.lock().unwrap().apply(selector, gesture, false)
    }

    async fn force(&self, selector: &str, gesture: &Gesture) -> Result<()> {
        self.state.lock().unwrap().apply(selector, gesture, true)
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        Ok(s.element(selector)?.value.clone())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.log(format!("key {} {}", selector, key));
        let reactions = s.on_key.get(selector).cloned();
        s.react(reactions);
        Ok(())
    }

    async fn blur(&self, selector: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .log(format!("blur {}", selector));
        Ok(())
    }

    async fn settle(&self, _idle_ms: u64, _timeout_ms: u64) -> Result<()> {
        Ok(())
    }

    async fn pause(&self, ms: u64) {
        self.state.lock().unwrap().paused_ms += ms;
        tokio::task::yield_now().await;
    }

    async fn close_popups(&self) -> Result<usize> {
        let mut s = self.state.lock().unwrap();
        let closed = s.popups;
        s.popups = 0;
        s.log(format!("close_popups {}", closed));
        Ok(closed)
    }

    async fn arm_download(&self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.armed = true;
        s.log("arm_download".into());
        Ok(())
    }

    async fn take_download(&self) -> Result<Option<Download>> {
        Ok(self.state.lock().unwrap().pending.take())
    }

    async fn capture(&self, label: &str) -> Option<PathBuf> {
        let mut s = self.state.lock().unwrap();
        s.captures.push(label.to_string());
        Some(Path::new("/tmp").join(format!("{}.png", label)))
    }
}

/// Config with short timeouts pointed at `dir`.
pub fn test_config(dir: &Path) -> Config {
    let yaml = format!(
        r#"
target:
  url: "https://warranty.example.com/register"
environment: test
timeouts:
  default_ms: 1000
  probe_ms: 200
  candidate_ms: 300
  poll_ms: 50
  settle_idle_ms: 0
  autofill_wait_ms: 100
  download_ms: 500
  popup_grace_ms: 10
capture:
  screenshot_dir: "{shots}"
downloads:
  dir: "{certs}"
"#,
        shots = dir.join("shots").display(),
        certs = dir.join("certs").display()
    );
    Config::parse_with_params(&yaml, &Params::new()).unwrap()
}
