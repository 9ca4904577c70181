//! Declarative selector strategies for every logical form target.
//!
//! Each logical name maps to an ordered list of strategies. Accessibility
//! lookups come first because the site regenerates structural ids on every
//! deploy; CSS paths and positional fallbacks follow.

use super::names::*;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One concrete way to find an element.
///
/// Written in config as a prefixed string: `role:button|Next`,
/// `label:First Name`, `placeholder:Email`, `text:Continue`,
/// `contains:already registered`, `css:#serial`, `nth:form input[type=text]|2`.
/// Unprefixed strings are treated as `text:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Strategy {
    /// ARIA role (explicit or implied by the tag) plus accessible name.
    Role { role: String, name: String },
    /// Form control whose label, aria-label or aria-labelledby matches.
    Label(String),
    /// Input or textarea by placeholder.
    Placeholder(String),
    /// Interactive element by visible text.
    Text(String),
    /// Innermost element of any kind whose text contains the value.
    Contains(String),
    /// Direct CSS selector.
    Css(String),
    /// The nth (zero-based) visible match of a CSS selector.
    Nth { css: String, index: usize },
}

/// How stable a strategy is expected to be across site deploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrategyTier {
    Accessible,
    Structural,
    Positional,
}

/// Which match to take when a strategy matches several elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pick {
    #[default]
    First,
    Last,
}

impl Pick {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pick::First => "first",
            Pick::Last => "last",
        }
    }
}

impl Strategy {
    pub fn tier(&self) -> StrategyTier {
        match self {
            Strategy::Role { .. }
            | Strategy::Label(_)
            | Strategy::Placeholder(_)
            | Strategy::Text(_)
            | Strategy::Contains(_) => StrategyTier::Accessible,
            Strategy::Css(_) => StrategyTier::Structural,
            Strategy::Nth { .. } => StrategyTier::Positional,
        }
    }

    /// Arguments handed to the in-page resolver: (kind, value, extra).
    pub fn js_args(&self) -> (&'static str, &str, String) {
        match self {
            Strategy::Role { role, name } => ("role", role, name.clone()),
            Strategy::Label(v) => ("label", v, String::new()),
            Strategy::Placeholder(v) => ("placeholder", v, String::new()),
            Strategy::Text(v) => ("text", v, String::new()),
            Strategy::Contains(v) => ("contains", v, String::new()),
            Strategy::Css(v) => ("css", v, String::new()),
            Strategy::Nth { css, index } => ("nth", css, index.to_string()),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Role { role, name } => write!(f, "role:{}|{}", role, name),
            Strategy::Label(v) => write!(f, "label:{}", v),
            Strategy::Placeholder(v) => write!(f, "placeholder:{}", v),
            Strategy::Text(v) => write!(f, "text:{}", v),
            Strategy::Contains(v) => write!(f, "contains:{}", v),
            Strategy::Css(v) => write!(f, "css:{}", v),
            Strategy::Nth { css, index } => write!(f, "nth:{}|{}", css, index),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (prefix, rest) = match s.split_once(':') {
            Some((p, r)) if is_prefix(p) => (p, r.trim()),
            _ => ("text", s),
        };
        if rest.is_empty() {
            return Err(format!("empty strategy '{}'", s));
        }
        let strategy = match prefix {
            "role" => {
                let (role, name) = rest.split_once('|').unwrap_or((rest, ""));
                Strategy::Role {
                    role: role.trim().to_string(),
                    name: name.trim().to_string(),
                }
            }
            "label" => Strategy::Label(rest.into()),
            "placeholder" => Strategy::Placeholder(rest.into()),
            "contains" => Strategy::Contains(rest.into()),
            "css" => Strategy::Css(rest.into()),
            "nth" => {
                let (css, index) = rest
                    .rsplit_once('|')
                    .ok_or_else(|| format!("nth strategy '{}' needs 'css|index'", s))?;
                let index = index
                    .trim()
                    .parse()
                    .map_err(|_| format!("nth strategy '{}' has a bad index", s))?;
                Strategy::Nth {
                    css: css.trim().to_string(),
                    index,
                }
            }
            _ => Strategy::Text(rest.into()),
        };
        Ok(strategy)
    }
}

impl TryFrom<String> for Strategy {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

fn is_prefix(p: &str) -> bool {
    matches!(
        p,
        "role" | "label" | "placeholder" | "text" | "contains" | "css" | "nth"
    )
}

fn role(role: &str, name: &str) -> Strategy {
    Strategy::Role {
        role: role.into(),
        name: name.into(),
    }
}

fn label(v: &str) -> Strategy {
    Strategy::Label(v.into())
}

fn placeholder(v: &str) -> Strategy {
    Strategy::Placeholder(v.into())
}

fn text(v: &str) -> Strategy {
    Strategy::Text(v.into())
}

fn contains(v: &str) -> Strategy {
    Strategy::Contains(v.into())
}

fn css(v: &str) -> Strategy {
    Strategy::Css(v.into())
}

fn nth(v: &str, index: usize) -> Strategy {
    Strategy::Nth {
        css: v.into(),
        index,
    }
}

/// Logical name -> ordered strategies.
#[derive(Debug, Clone)]
pub struct SelectorTable {
    entries: BTreeMap<String, Vec<Strategy>>,
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SelectorTable {
    /// An empty table (mostly useful for tests).
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in table for the registration form.
    pub fn builtin() -> Self {
        let mut t = Self::empty();

        t.insert(
            REGISTERING_FOR_CUSTOMER,
            vec![
                role("radio", "on behalf of"),
                label("on behalf of a customer"),
                css("input[type=radio][value*='behalf' i]"),
                nth("form input[type=radio]", 1),
            ],
        );

        t.insert(
            SERIAL_NUMBER,
            vec![
                role("textbox", "Serial Number"),
                label("Serial"),
                placeholder("Serial"),
                css("input[name*='serial' i], input[id*='serial' i]"),
            ],
        );
        t.insert(
            ADD_PRODUCT,
            vec![
                role("button", "Add Another Product"),
                text("Add Another"),
                css("button[id*='addProduct' i], a[id*='addProduct' i]"),
            ],
        );
        t.insert(
            ALREADY_REGISTERED_NOTICE,
            vec![
                contains("already been registered"),
                contains("already registered"),
                css("[class*='error' i][class*='registered' i]"),
            ],
        );
        t.insert(
            INVALID_SERIAL_NOTICE,
            vec![
                contains("invalid serial"),
                contains("serial number is not valid"),
                css("[class*='error' i][class*='serial' i]"),
            ],
        );

        t.insert(
            INSTALLATION_DATE,
            vec![
                role("textbox", "Installation Date"),
                label("Install"),
                placeholder("MM/DD/YYYY"),
                css("input[name*='install' i], input[id*='installDate' i]"),
            ],
        );
        t.insert(
            RESIDENTIAL,
            vec![
                role("radio", "Residential"),
                label("Residential"),
                css("input[type=radio][value*='resid' i]"),
            ],
        );
        t.insert(
            OWNER_OCCUPIED,
            vec![
                role("radio", "Owner Occupied"),
                label("Owner"),
                css("input[type=radio][value*='owner' i]"),
            ],
        );

        t.insert(
            NEXT,
            vec![
                role("button", "Next"),
                text("Next"),
                css("button[type=submit][id*='next' i]"),
            ],
        );
        t.insert(
            CONTINUE,
            vec![
                role("button", "Continue"),
                text("Continue"),
                css("button[id*='continue' i]"),
            ],
        );

        text_field(&mut t, FIRST_NAME, "First Name", "first", 0);
        text_field(&mut t, LAST_NAME, "Last Name", "last", 1);
        text_field(&mut t, PHONE, "Phone", "phone", 2);
        text_field(&mut t, EMAIL, "Email", "email", 3);
        text_field(&mut t, ADDRESS, "Address", "address1", 4);
        text_field(&mut t, ZIP, "Zip", "zip", 5);
        text_field(&mut t, CITY, "City", "city", 6);
        t.insert(
            STATE,
            vec![
                role("combobox", "State"),
                label("State"),
                css("select[name*='state' i], input[name*='state' i]"),
            ],
        );
        t.insert(
            CONSENT,
            vec![
                role("checkbox", "agree"),
                label("consent"),
                css("input[type=checkbox][name*='consent' i]"),
                nth("form input[type=checkbox]", 0),
            ],
        );

        t.insert(
            DEALER_ZIP,
            vec![
                role("textbox", "Dealer Zip"),
                label("Dealer Zip"),
                css("input[name*='dealerZip' i], input[id*='dealerZip' i]"),
            ],
        );
        t.insert(
            DEALER_NAME,
            vec![
                role("combobox", "Dealer Name"),
                role("textbox", "Dealer Name"),
                label("Dealer Name"),
                css("input[name*='dealerName' i]"),
            ],
        );
        t.insert(
            DEALER_ADDRESS,
            vec![
                role("textbox", "Dealer Address"),
                label("Dealer Address"),
                css("input[name*='dealerAddress' i]"),
            ],
        );
        t.insert(
            DEALER_CITY,
            vec![
                role("textbox", "Dealer City"),
                label("Dealer City"),
                css("input[name*='dealerCity' i]"),
            ],
        );
        t.insert(
            DEALER_STATE,
            vec![
                role("combobox", "Dealer State"),
                label("Dealer State"),
                css("select[name*='dealerState' i], input[name*='dealerState' i]"),
            ],
        );
        t.insert(
            DEALER_PHONE,
            vec![
                role("textbox", "Dealer Phone"),
                label("Dealer Phone"),
                css("input[name*='dealerPhone' i]"),
            ],
        );

        t.insert(
            REGISTER,
            vec![
                role("button", "Register"),
                text("Register"),
                css("button[id*='register' i]"),
            ],
        );
        t.insert(
            AFFIRM,
            vec![
                role("button", "Affirm"),
                text("Affirm"),
                css("button[id*='affirm' i]"),
            ],
        );
        t.insert(
            FINAL_YES,
            vec![
                role("button", "Yes"),
                css("[role=dialog] button[id*='yes' i]"),
            ],
        );
        t.insert(
            DOWNLOAD_CERTIFICATE,
            vec![
                role("button", "Download Certificate"),
                role("link", "Download Certificate"),
                text("Download Certificate"),
                css("a[href*='certificate' i], button[id*='certificate' i]"),
            ],
        );

        t.insert(
            COOKIE_BANNER,
            vec![
                role("dialog", "cookie"),
                contains("we use cookies"),
                css("#onetrust-banner-sdk"),
            ],
        );
        t.insert(
            COOKIE_ACCEPT,
            vec![
                role("button", "Accept All Cookies"),
                role("button", "Accept"),
                css("#onetrust-accept-btn-handler"),
            ],
        );
        t.insert(
            CONTRACTOR_DIALOG,
            vec![
                role("dialog", "installing contractor"),
                contains("installing contractor"),
            ],
        );
        t.insert(
            CONTRACTOR_DISMISS,
            vec![
                role("button", "No Thanks"),
                role("button", "No"),
                css("[role=dialog] button[id*='contractor' i][id*='no' i]"),
            ],
        );
        t.insert(
            ADDRESS_DIALOG,
            vec![
                role("dialog", "address"),
                contains("confirm your address"),
                contains("suggested address"),
            ],
        );
        t.insert(
            ADDRESS_CONFIRM,
            vec![
                role("button", "Use Address as Entered"),
                role("button", "Confirm Address"),
                css("[role=dialog] button[id*='address' i]"),
            ],
        );
        t.insert(
            ACK_DIALOG,
            vec![role("alertdialog", ""), css("[role=dialog] .modal-footer button")],
        );
        t.insert(
            ACK_OK,
            vec![
                role("button", "OK"),
                css("[role=dialog] button[id*='ok' i]"),
            ],
        );
        t.insert(
            CONFIRM_DIALOG,
            vec![role("dialog", "are you sure"), contains("are you sure")],
        );
        t.insert(
            CONFIRM_YES,
            vec![
                role("button", "Yes"),
                css("[role=dialog] button[id*='yes' i]"),
            ],
        );

        t
    }

    /// Replace entries with configured overrides.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, Vec<Strategy>>) -> Result<Self> {
        for (name, strategies) in overrides {
            if !self.entries.contains_key(name) {
                return Err(Error::Config(format!(
                    "selectors: unknown logical name '{}'",
                    name
                )));
            }
            if strategies.is_empty() {
                return Err(Error::Config(format!(
                    "selectors: '{}' needs at least one strategy",
                    name
                )));
            }
            self.entries.insert(name.clone(), strategies.clone());
        }
        Ok(self)
    }

    pub fn insert(&mut self, name: &str, strategies: Vec<Strategy>) {
        self.entries.insert(name.to_string(), strategies);
    }

    pub fn get(&self, name: &str) -> Option<&[Strategy]> {
        self.entries.get(name).map(|v| v.as_slice())
    }

    /// Strategies for `name`, or a config error if the name is unknown.
    pub fn strategies(&self, name: &str) -> Result<&[Strategy]> {
        self.get(name)
            .ok_or_else(|| Error::Config(format!("no selector strategies for '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Strategy])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn text_field(t: &mut SelectorTable, name: &str, accessible: &str, attr: &str, position: usize) {
    t.insert(
        name,
        vec![
            role("textbox", accessible),
            label(accessible),
            placeholder(accessible),
            css(&format!(
                "input[name*='{attr}' i], input[id*='{attr}' i]",
                attr = attr
            )),
            nth("form input[type=text], form input:not([type])", position),
        ],
    );
}
