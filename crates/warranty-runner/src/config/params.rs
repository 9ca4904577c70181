use crate::{Error, Result};
use std::collections::HashMap;

/// Values available to `${NAME}` placeholders in a config file.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    /// Create empty params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the process environment.
    pub fn from_env() -> Self {
        Self {
            values: std::env::vars().collect(),
        }
    }

    /// Set a parameter value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get a parameter value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay "KEY=VALUE" pairs from the command line.
    pub fn with_args(mut self, args: &[String]) -> Result<Self> {
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected KEY=VALUE", arg))
            })?;
            self.values.insert(key.to_string(), value.to_string());
        }
        Ok(self)
    }
}

/// Substitute `${NAME}` and `${NAME:-default}` patterns in a string.
pub fn substitute(template: &str, params: &Params) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        let Some(var_end) = result[var_start..].find('}') else {
            break;
        };
        let var_end = var_start + var_end;

        let expr = &result[var_start + 2..var_end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        let value = match (params.get(name), default) {
            (Some(v), _) if !v.is_empty() => v.to_string(),
            (_, Some(d)) => d.to_string(),
            (Some(v), None) => v.to_string(),
            (None, None) => {
                return Err(Error::Config(format!(
                    "missing environment variable: {}",
                    name
                )))
            }
        };

        result.replace_range(var_start..=var_end, &value);
        start = var_start + value.len();
    }

    Ok(result)
}

/// Recursively substitute params in a serde_yaml::Value.
pub fn substitute_value(value: &mut serde_yaml::Value, params: &Params) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = substitute(s, params)?;
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, params)?;
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_value(v, params)?;
            }
        }
        _ => {}
    }
    Ok(())
}
