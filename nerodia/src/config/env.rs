//! `${NAME}` expansion of configuration strings.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::{Error, Result};

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference regex is valid")
});

/// Expand every `${NAME}` reference in the string values of `value`.
///
/// `lookup` resolves variable names; an unresolved name fails with
/// `InvalidConfig` naming the dotted key that referenced it.
pub fn expand_env<F>(value: &mut Value, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    expand_at(value, "", lookup)
}

fn expand_at<F>(value: &mut Value, path: &str, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            if let Some(expanded) = expand_str(text, path, lookup)? {
                *text = expanded;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                expand_at(item, &format!("{path}[{index}]"), lookup)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                expand_at(item, &child, lookup)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn expand_str<F>(text: &str, path: &str, lookup: &F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if !text.contains("${") {
        return Ok(None);
    }

    let mut missing = None;
    let expanded = ENV_REFERENCE.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(name) {
            Some(resolved) => resolved,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(Error::invalid_config(
            path,
            format!("environment variable `{name}` is not set"),
        ));
    }
    Ok(Some(expanded.into_owned()))
}
