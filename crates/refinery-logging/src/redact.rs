use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Scrubs sensitive data from a run record before it is written.
///
/// Values under listed keys are replaced wholesale at any depth; every other
/// string is passed through the configured patterns (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    keys: Vec<String>,
    patterns: Vec<(Regex, String)>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_pattern(mut self, pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        self.patterns.push((regex, replacement.to_string()));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.keys.iter().any(|k| k == key) {
                            Value::String(format!("[REDACTED_{}]", key.to_uppercase()))
                        } else {
                            self.redact(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::String(text) => Value::String(self.redact_text(text)),
            other => other.clone(),
        }
    }

    fn redact_text(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }
}
