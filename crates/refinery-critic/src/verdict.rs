use refinery_model::ModelResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// The meta-critic's judgement of a critique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionabilityVerdict {
    /// Whether the critique is worth refining against
    pub actionable: bool,
    /// Free-form explanation, when the meta-critic gives one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Error, Debug)]
pub enum VerdictParseError {
    #[error("No verdict found in meta-critic output")]
    NoVerdictFound,

    #[error("Meta-critic verdict is missing boolean field '{0}'")]
    MissingField(&'static str),

    #[error("Failed to parse verdict JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid verdict format: {0}")]
    InvalidFormat(String),
}

impl ActionabilityVerdict {
    pub fn not_actionable() -> Self {
        Self {
            actionable: false,
            reason: None,
        }
    }

    /// Interpret a meta-critic response
    pub fn from_response(response: &ModelResponse) -> Result<Self, VerdictParseError> {
        match response {
            ModelResponse::Structured(value) => Self::from_value(value),
            ModelResponse::Text(text) => Self::parse(text),
        }
    }

    /// Parse a verdict from meta-critic text.
    ///
    /// Accepted forms:
    /// ```text
    /// <verdict>
    /// {"actionable": true, "reason": "..."}
    /// </verdict>
    /// ```
    /// or the bare JSON object, optionally inside a ```json fence.
    pub fn parse(output: &str) -> Result<Self, VerdictParseError> {
        debug!(output_len = output.len(), "Parsing meta-critic verdict");

        if let Some(verdict) = Self::parse_verdict_block(output)? {
            return Ok(verdict);
        }

        let body = strip_fence(output.trim());
        if body.starts_with('{') {
            let value: Value = serde_json::from_str(body)?;
            return Self::from_value(&value);
        }

        Err(VerdictParseError::NoVerdictFound)
    }

    fn parse_verdict_block(output: &str) -> Result<Option<Self>, VerdictParseError> {
        let start = output.find("<verdict>");
        let end = output.find("</verdict>");

        match (start, end) {
            (Some(start), Some(end)) if start < end => {
                let json_str = output[start + "<verdict>".len()..end].trim();
                debug!(json = json_str, "Found verdict block");
                let value: Value = serde_json::from_str(strip_fence(json_str))?;
                Self::from_value(&value).map(Some)
            }
            (Some(_), Some(_)) => Err(VerdictParseError::InvalidFormat(
                "Malformed verdict block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn from_value(value: &Value) -> Result<Self, VerdictParseError> {
        let object = value.as_object().ok_or_else(|| {
            VerdictParseError::InvalidFormat(format!("expected a JSON object, got {}", value))
        })?;

        let actionable = object
            .get("actionable")
            .and_then(Value::as_bool)
            .ok_or(VerdictParseError::MissingField("actionable"))?;

        let reason = object
            .get("reason")
            .or_else(|| object.get("explanation"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self { actionable, reason })
    }

    pub fn short_description(&self) -> String {
        let label = if self.actionable {
            "ACTIONABLE"
        } else {
            "NOT ACTIONABLE"
        };
        match &self.reason {
            Some(reason) => format!("{} ({})", label, reason),
            None => label.to_string(),
        }
    }
}

/// Remove a surrounding markdown code fence, if any
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // drop the info string (e.g. `json`)
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}
