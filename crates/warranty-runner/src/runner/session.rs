//! eoka-backed browser session: one browser process, one main page.

use super::certificate::Download;
use super::driver::{Gesture, PageDriver, Resolved};
use crate::config::{BrowserPosture, CaptureConfig, Config, Pick, Strategy};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use eoka::{Browser, Page};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Evaluate one strategy. Args: (kind, value, arg, pick).
/// Visible matches win over hidden ones; returns null when nothing matches.
const RESOLVE_JS: &str = r#"
((kind, value, arg, pick) => {
    const lc = s => (s || '').toLowerCase().replace(/\s+/g, ' ').trim();
    const want = lc(value);

    function selector(el) {
        if (el.id) return '#' + CSS.escape(el.id);
        const path = [];
        let n = el;
        while (n && n.nodeType === 1) {
            let s = n.tagName.toLowerCase();
            if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
            const p = n.parentElement;
            if (p) {
                const sibs = [...p.children].filter(c => c.tagName === n.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
            }
            path.unshift(s);
            n = p;
        }
        return path.join(' > ');
    }

    function visible(el) {
        const r = el.getBoundingClientRect();
        const s = getComputedStyle(el);
        return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
    }

    function labelText(el) {
        const parts = [el.getAttribute('aria-label')];
        const by = el.getAttribute('aria-labelledby');
        if (by) by.split(/\s+/).forEach(id => parts.push(document.getElementById(id)?.innerText));
        if (el.labels) [...el.labels].forEach(l => parts.push(l.innerText));
        return lc(parts.filter(Boolean).join(' '));
    }

    function accessibleName(el) {
        return labelText(el) || lc(el.innerText) || lc(el.value) || lc(el.placeholder) || lc(el.title);
    }

    const ROLES = {
        button: 'button,input[type=button],input[type=submit],input[type=reset],[role=button]',
        textbox: 'input:not([type]),input[type=text],input[type=email],input[type=tel],input[type=search],input[type=url],input[type=number],textarea,[role=textbox]',
        radio: 'input[type=radio],[role=radio]',
        checkbox: 'input[type=checkbox],[role=checkbox]',
        combobox: 'select,input[list],[role=combobox]',
        link: 'a[href],[role=link]',
        dialog: 'dialog,[role=dialog]',
        alertdialog: '[role=alertdialog]',
    };
    const INTERACTIVE = 'a,button,input,select,textarea,[role=button],[onclick],[tabindex]';

    function all(css) {
        try { return [...document.querySelectorAll(css)]; } catch (e) { return []; }
    }

    let matches = [];
    switch (kind) {
        case 'role': {
            const name = lc(arg);
            matches = all(ROLES[want] || `[role="${value}"]`)
                .filter(e => !name || accessibleName(e).includes(name));
            break;
        }
        case 'label':
            matches = all('input,select,textarea,[role=textbox],[role=combobox],[role=checkbox],[role=radio]')
                .filter(e => labelText(e).includes(want));
            break;
        case 'placeholder':
            matches = all('input,textarea').filter(e => lc(e.placeholder).includes(want));
            break;
        case 'text':
            matches = all(INTERACTIVE).filter(e => accessibleName(e).includes(want));
            break;
        case 'contains': {
            const hits = all('body *').filter(e => lc(e.innerText).includes(want));
            matches = hits.filter(e => !hits.some(o => o !== e && e.contains(o)));
            break;
        }
        case 'css':
            matches = all(value);
            break;
        case 'nth': {
            const shown = all(value).filter(visible);
            const i = parseInt(arg, 10);
            matches = shown[i] ? [shown[i]] : [];
            break;
        }
    }

    if (!matches.length) return null;
    const shown = matches.filter(visible);
    const pool = shown.length ? shown : matches;
    const el = pick === 'last' ? pool[pool.length - 1] : pool[0];
    return {
        selector: selector(el),
        tag: el.tagName.toLowerCase(),
        text: (el.innerText || el.value || '').trim().slice(0, 80),
        visible: visible(el),
        enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
    };
})
"#;

/// 'ok' when a click at the element's center would land on it (or its label).
const HIT_TEST_JS: &str = r#"
((sel) => {
    const el = document.querySelector(sel);
    if (!el) return 'missing';
    const r = el.getBoundingClientRect();
    if (r.width === 0 || r.height === 0) return 'hidden';
    const top = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
    if (!top) return 'offscreen';
    if (top === el || el.contains(top)) return 'ok';
    if (el.labels && [...el.labels].some(l => l === top || l.contains(top))) return 'ok';
    return 'occluded by ' + top.tagName.toLowerCase();
})
"#;

const SET_VALUE_JS: &str = r#"
((sel, value, append) => {
    const el = document.querySelector(sel);
    if (!el) return false;
    el.focus();
    const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value')?.set;
    const next = append ? (el.value || '') + value : value;
    if (setter) setter.call(el, next); else el.value = next;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})
"#;

const SELECT_JS: &str = r#"
((sel, value) => {
    const el = document.querySelector(sel);
    if (!el) return 'element_not_found';
    const want = value.trim().toUpperCase();
    const opt = Array.from(el.options || []).find(o =>
        o.value.toUpperCase() === want || o.text.trim().toUpperCase() === want);
    if (!opt) return 'option_not_found';
    el.value = opt.value;
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return 'ok';
})
"#;

/// Intercepts the next file download and stashes it as base64 in `window.__certCapture`.
const ARM_DOWNLOAD_JS: &str = r#"
(() => {
    window.__certCapture = null;
    if (window.__certHook) return true;
    window.__certHook = true;

    const toBase64 = buf => {
        const bytes = new Uint8Array(buf);
        let s = '';
        for (let i = 0; i < bytes.length; i += 0x8000) {
            s += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
        }
        return btoa(s);
    };
    const grab = async (url, name) => {
        try {
            const res = await fetch(url, { credentials: 'include' });
            const buf = await res.arrayBuffer();
            window.__certCapture = {
                name: name || '',
                mime: res.headers.get('content-type') || '',
                data: toBase64(buf),
            };
        } catch (e) {
            window.__certCapture = { error: String(e) };
        }
    };
    const isFile = url => /^blob:|^data:application\/pdf|\.pdf($|[?#])/i.test(String(url || ''));

    document.addEventListener('click', ev => {
        const a = ev.target && ev.target.closest && ev.target.closest('a[href]');
        if (a && (a.hasAttribute('download') || isFile(a.href))) {
            ev.preventDefault();
            grab(a.href, a.getAttribute('download'));
        }
    }, true);

    const anchorClick = HTMLAnchorElement.prototype.click;
    HTMLAnchorElement.prototype.click = function () {
        if (this.hasAttribute('download') || isFile(this.href)) {
            grab(this.href, this.getAttribute('download'));
            return;
        }
        return anchorClick.call(this);
    };

    const open = window.open;
    window.open = function (url, ...rest) {
        if (isFile(url)) { grab(String(url), ''); return null; }
        return open.call(window, url, ...rest);
    };
    return true;
})()
"#;

#[derive(Debug, Deserialize)]
struct Captured {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime: String,
    data: Option<String>,
    error: Option<String>,
}

fn js(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// A live browser with the registration page open.
pub struct Session {
    browser: Mutex<Browser>,
    page: Page,
    main_tab: String,
    capture: CaptureConfig,
    posture: BrowserPosture,
}

impl Session {
    /// Launch the browser with the configured posture and open a blank page.
    pub async fn open(config: &Config) -> Result<Self> {
        let posture = config.posture();
        let stealth = eoka::StealthConfig {
            headless: posture.headless,
            proxy: posture.proxy.clone(),
            user_agent: posture.user_agent.clone(),
            viewport_width: posture.viewport.width,
            viewport_height: posture.viewport.height,
            ..Default::default()
        };

        if posture.devtools {
            warn!("devtools requested but not supported by the browser backend; ignoring");
        }
        if config.capture.video {
            warn!("video capture requested but not supported by the browser backend; ignoring");
        }

        info!(
            "Launching browser (env: {:?}, headless: {}, slow_mo: {}ms)",
            config.environment, posture.headless, posture.slow_mo_ms
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        if posture.ignore_https_errors {
            page.ignore_cert_errors(true).await?;
            debug!("TLS certificate errors ignored for this session");
        }
        let main_tab = page.target_id().to_string();

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            main_tab,
            capture: config.capture.clone(),
            posture,
        })
    }

    /// The main page (for callers that need raw eoka access).
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Tear down page then browser. Never fails; problems are logged.
    pub async fn close(self) {
        let browser = self.browser.into_inner();
        if let Err(e) = browser.close_tab(&self.main_tab).await {
            let err = Error::Teardown(format!("closing page: {}", e));
            warn!("{}", err);
        }
        if let Err(e) = browser.close().await {
            let err = Error::Teardown(format!("closing browser: {}", e));
            warn!("{}", err);
        }
        debug!("Browser session closed");
    }

    async fn slow_mo(&self) {
        if self.posture.slow_mo_ms > 0 {
            self.page.wait(self.posture.slow_mo_ms).await;
        }
    }

    async fn hit_test(&self, selector: &str) -> Result<()> {
        let js = format!("{}({})", HIT_TEST_JS, js(selector));
        let verdict: String = self.page.evaluate(&js).await?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(Error::Automation(format!("{} is not clickable: {}", selector, verdict)))
        }
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && (el.checked === true || el.getAttribute('aria-checked') === 'true'); }})()",
            js(selector)
        );
        Ok(self.page.evaluate(&js).await?)
    }

    async fn focus_end(&self, selector: &str) -> Result<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return; el.focus(); if (el.setSelectionRange) {{ const n = (el.value || '').length; el.setSelectionRange(n, n); }} }})()",
            js(selector)
        );
        self.page.execute(&js).await?;
        Ok(())
    }

    async fn set_value(&self, selector: &str, value: &str, append: bool) -> Result<()> {
        let script = format!(
            "{}({},{},{})",
            SET_VALUE_JS,
            js(selector),
            js(value),
            append
        );
        let found: bool = self.page.evaluate(&script).await?;
        if found {
            Ok(())
        } else {
            Err(Error::Automation(format!("{} disappeared", selector)))
        }
    }

    async fn select(&self, selector: &str, value: &str) -> Result<()> {
        let script = format!("{}({},{})", SELECT_JS, js(selector), js(value));
        let result: String = self.page.evaluate(&script).await?;
        match result.as_str() {
            "ok" => Ok(()),
            "option_not_found" => Err(Error::Automation(format!(
                "option '{}' not found in {}",
                value, selector
            ))),
            _ => Err(Error::Automation(format!("{} disappeared", selector))),
        }
    }
}

#[async_trait]
impl PageDriver for Session {
    async fn goto(&self, url: &str) -> Result<()> {
        info!("Navigating to: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn resolve(&self, strategy: &Strategy, pick: Pick) -> Result<Option<Resolved>> {
        let (kind, value, arg) = strategy.js_args();
        let script = format!(
            "{}({},{},{},{})",
            RESOLVE_JS,
            js(kind),
            js(value),
            js(&arg),
            js(pick.as_str())
        );
        Ok(self.page.evaluate(&script).await?)
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        let script = format!(
            "document.querySelector({})?.scrollIntoView({{behavior:'smooth',block:'center'}})",
            js(selector)
        );
        self.page.execute(&script).await?;
        self.page.wait(200).await;
        Ok(())
    }

    async fn perform(&self, selector: &str, gesture: &Gesture) -> Result<()> {
        match gesture {
            Gesture::Click => {
                self.hit_test(selector).await?;
                self.page.click(selector).await?;
            }
            Gesture::Fill(value) => {
                self.hit_test(selector).await?;
                self.page.fill(selector, value).await?;
            }
            Gesture::Type(value) => {
                self.hit_test(selector).await?;
                self.focus_end(selector).await?;
                self.page.type_text(value).await?;
            }
            Gesture::Check(on) => {
                if self.is_checked(selector).await? != *on {
                    self.hit_test(selector).await?;
                    self.page.click(selector).await?;
                }
            }
            Gesture::Select(value) => self.select(selector, value).await?,
        }
        self.slow_mo().await;
        Ok(())
    }

    async fn force(&self, selector: &str, gesture: &Gesture) -> Result<()> {
        match gesture {
            Gesture::Click => {
                let script = format!(
                    "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
                    js(selector)
                );
                let found: bool = self.page.evaluate(&script).await?;
                if !found {
                    return Err(Error::Automation(format!("{} disappeared", selector)));
                }
            }
            Gesture::Fill(value) => self.set_value(selector, value, false).await?,
            Gesture::Type(value) => self.set_value(selector, value, true).await?,
            Gesture::Check(on) => {
                if self.is_checked(selector).await? != *on {
                    let script = format!("document.querySelector({})?.click()", js(selector));
                    self.page.execute(&script).await?;
                }
            }
            Gesture::Select(value) => self.select(selector, value).await?,
        }
        self.slow_mo().await;
        Ok(())
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return null; return ('value' in el) ? String(el.value) : (el.innerText || ''); }})()",
            js(selector)
        );
        let value: Option<String> = self.page.evaluate(&script).await?;
        value.ok_or_else(|| Error::Automation(format!("{} disappeared", selector)))
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        self.focus_end(selector).await?;
        self.page.human().press_key(key).await?;
        Ok(())
    }

    async fn blur(&self, selector: &str) -> Result<()> {
        let script = format!("document.querySelector({})?.blur()", js(selector));
        self.page.execute(&script).await?;
        Ok(())
    }

    async fn settle(&self, idle_ms: u64, timeout_ms: u64) -> Result<()> {
        self.page.wait_for_network_idle(idle_ms, timeout_ms).await?;
        Ok(())
    }

    async fn pause(&self, ms: u64) {
        self.page.wait(ms).await;
    }

    async fn close_popups(&self) -> Result<usize> {
        let browser = self.browser.lock().await;
        let tabs = browser.tabs().await?;
        let mut closed = 0;
        for tab in tabs.iter().filter(|t| t.id != self.main_tab) {
            debug!("Closing popup tab {} ({})", tab.id, tab.url);
            match browser.close_tab(&tab.id).await {
                Ok(()) => closed += 1,
                Err(e) => warn!("Failed to close popup tab {}: {}", tab.id, e),
            }
        }
        if closed > 0 {
            browser.activate_tab(&self.main_tab).await?;
            info!("Closed {} popup tab(s)", closed);
        }
        Ok(closed)
    }

    async fn arm_download(&self) -> Result<()> {
        let _: bool = self.page.evaluate(ARM_DOWNLOAD_JS).await?;
        debug!("Download hook armed");
        Ok(())
    }

    async fn take_download(&self) -> Result<Option<Download>> {
        let captured: Option<Captured> = self.page.evaluate("window.__certCapture || null").await?;
        let Some(captured) = captured else {
            return Ok(None);
        };
        if let Some(err) = captured.error {
            return Err(Error::Automation(format!("certificate download failed: {}", err)));
        }
        let Some(data) = captured.data else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| Error::Automation(format!("certificate payload is not base64: {}", e)))?;
        Ok(Some(Download {
            suggested_name: captured.name,
            mime: captured.mime,
            bytes,
        }))
    }

    async fn capture(&self, label: &str) -> Option<PathBuf> {
        if !self.capture.screenshots {
            return None;
        }
        let dir = &self.capture.screenshot_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create screenshot dir {}: {}", dir.display(), e);
            return None;
        }
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = dir.join(format!("{}-{}.png", stamp, label));
        let data = match self.page.screenshot().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to take screenshot '{}': {}", label, e);
                return None;
            }
        };
        match std::fs::write(&path, data) {
            Ok(()) => {
                info!("Saved screenshot to: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to save screenshot: {}", e);
                None
            }
        }
    }
}
