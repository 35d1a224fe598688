//! DR-005: `{{ name }}` placeholders and template values.
//!
//! Definition files are often shipped as templates (e.g. `From:
//! org/image:{{ version }}`). Values come from a YAML mapping file overlaid by
//! `--set KEY=VALUE` flags, and are rendered into the text before parsing.

use super::error::{Error, TemplateError};
use indexmap::IndexMap;
use std::path::Path;

/// Resolved template values, name → rendered string.
pub type Values = IndexMap<String, String>;

/// Render every `{{ name }}` placeholder in `template`.
pub fn render(template: &str, values: &Values) -> Result<String, TemplateError> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or(TemplateError::Unclosed(open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = values
            .get(key)
            .ok_or_else(|| TemplateError::UnknownValue(key.to_string()))?
            .clone();

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Whether the text still contains a placeholder.
pub fn has_placeholders(text: &str) -> bool {
    text.find("{{")
        .is_some_and(|open| text[open..].contains("}}"))
}

/// Load values from a YAML mapping of scalars.
pub fn load_values_file(path: &Path) -> Result<Values, Error> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_values(&content)
}

/// Parse a YAML mapping of scalars into values.
pub fn parse_values(yaml: &str) -> Result<Values, Error> {
    let raw: IndexMap<String, serde_yaml_ng::Value> =
        serde_yaml_ng::from_str(yaml).map_err(|e| Error::Values(format!("YAML parse error: {}", e)))?;

    let mut values = Values::new();
    for (name, value) in raw {
        let rendered = scalar_to_string(&name, &value)?;
        values.insert(name, rendered);
    }
    Ok(values)
}

fn scalar_to_string(name: &str, value: &serde_yaml_ng::Value) -> Result<String, Error> {
    match value {
        serde_yaml_ng::Value::String(s) => Ok(s.clone()),
        serde_yaml_ng::Value::Number(n) => Ok(n.to_string()),
        serde_yaml_ng::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::Values(format!("value '{}' must be a scalar", name))),
    }
}

/// Overlay `KEY=VALUE` assignments onto `values`.
pub fn apply_overrides(values: &mut Values, assignments: &[String]) -> Result<(), Error> {
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| Error::Values(format!("expected KEY=VALUE, got '{}'", assignment)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Values(format!("empty key in '{}'", assignment)));
        }
        values.insert(key.to_string(), value.to_string());
    }
    Ok(())
}
