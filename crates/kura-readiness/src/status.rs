//! Status payload decoding.
//!
//! The status endpoint answers in one of two encodings carrying the same
//! two fields:
//!
//! ```text
//! <XMLResponse><State>1</State><Status>running</Status></XMLResponse>
//! {"Response": {"State": "1", "Status": "running"}}
//! ```
//!
//! Both decode to a [`StatusReport`]. Anything unrecognised decodes to an
//! empty report, which the poller treats as "not ready yet".

use serde::{Deserialize, Serialize};

/// Normalised status record extracted from either encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: Option<String>,
    pub error: Option<String>,
}

/// Lifecycle state of the subsystem as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum SubsystemStatus {
    Unknown,
    Starting,
    Running,
    Failed(String),
}

impl StatusReport {
    pub fn running() -> Self {
        Self {
            status: Some("running".to_string()),
            error: None,
        }
    }

    pub fn with_status(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: None,
            error: Some(error.to_string()),
        }
    }

    /// An explicit error wins over any status value.
    pub fn state(&self) -> SubsystemStatus {
        if let Some(error) = &self.error {
            return SubsystemStatus::Failed(error.clone());
        }
        match self.status.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("running") => SubsystemStatus::Running,
            Some(s) if s.eq_ignore_ascii_case("starting") => SubsystemStatus::Starting,
            _ => SubsystemStatus::Unknown,
        }
    }
}

impl std::fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed XML status: {0}")]
    Xml(String),
    #[error("malformed JSON status: {0}")]
    Json(String),
}

/// A status body classified by its first significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPayload<'a> {
    Xml(&'a str),
    Json(&'a str),
    Unrecognized,
}

pub fn sniff(body: &str) -> StatusPayload<'_> {
    let trimmed = body.trim_start_matches('\u{feff}').trim_start();
    match trimmed.as_bytes().first() {
        Some(b'<') => StatusPayload::Xml(trimmed),
        Some(b'{') => StatusPayload::Json(trimmed),
        _ => StatusPayload::Unrecognized,
    }
}

/// Decode a status body of either encoding. Never fails.
pub fn decode(body: &str) -> StatusReport {
    let decoded = match sniff(body) {
        StatusPayload::Xml(xml) => decode_xml(xml),
        StatusPayload::Json(json) => decode_json(json),
        StatusPayload::Unrecognized => {
            tracing::debug!("Unrecognised status payload");
            return StatusReport::default();
        }
    };
    decoded.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Could not decode status payload");
        StatusReport::default()
    })
}

/// First `Status` and `Error` elements anywhere in the document.
pub fn decode_xml(body: &str) -> Result<StatusReport, DecodeError> {
    let doc = roxmltree::Document::parse(body).map_err(|e| DecodeError::Xml(e.to_string()))?;
    let text_of = |name: &str| {
        doc.descendants()
            .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case(name))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    Ok(StatusReport {
        status: text_of("Status"),
        error: text_of("Error"),
    })
}

/// `Status` and `Error` from a `Response` object, else from the top level.
pub fn decode_json(body: &str) -> Result<StatusReport, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| DecodeError::Json(e.to_string()))?;
    let scope = field(&value, "Response")
        .filter(|v| v.is_object())
        .unwrap_or(&value);
    Ok(StatusReport {
        status: field(scope, "Status").and_then(as_text),
        error: field(scope, "Error").and_then(as_text),
    })
}

fn field<'a>(value: &'a serde_json::Value, name: &str) -> Option<&'a serde_json::Value> {
    value
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_running() {
        let body = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<XMLResponse><State>1</State><Type>CA</Type><Status>running</Status><Version>11.5.0</Version></XMLResponse>"#;
        let report = decode(body);
        assert_eq!(report.status.as_deref(), Some("running"));
        assert_eq!(report.error, None);
        assert_eq!(report.state(), SubsystemStatus::Running);
    }

    #[test]
    fn json_running_nested_in_response() {
        let body = r#"{"Response":{"State":"1","Type":"CA","Status":"running","Version":"11.5.0"}}"#;
        assert_eq!(decode(body).state(), SubsystemStatus::Running);
    }

    #[test]
    fn json_top_level_fields_are_accepted() {
        let body = r#"{"status": "starting"}"#;
        assert_eq!(decode(body).state(), SubsystemStatus::Starting);
    }

    #[test]
    fn both_encodings_yield_the_same_report() {
        let xml = "<XMLResponse><Status>1</Status><Error>Subsystem unavailable</Error></XMLResponse>";
        let json = r#"{"Response":{"Status":"1","Error":"Subsystem unavailable"}}"#;
        assert_eq!(decode_xml(xml).unwrap(), decode_json(json).unwrap());
    }

    #[test]
    fn error_field_wins_over_status() {
        let body = r#"{"Response":{"Status":"running","Error":"database offline"}}"#;
        assert_eq!(
            decode(body).state(),
            SubsystemStatus::Failed("database offline".to_string())
        );
    }

    #[test]
    fn null_and_blank_fields_are_absent() {
        let body = r#"{"Response":{"Status":null,"Error":"  "}}"#;
        assert_eq!(decode(body), StatusReport::default());
    }

    #[test]
    fn sniff_dispatches_on_first_significant_byte() {
        assert!(matches!(sniff("  \n<a/>"), StatusPayload::Xml(_)));
        assert!(matches!(sniff("\u{feff}{}"), StatusPayload::Json(_)));
        assert_eq!(sniff("Service Unavailable"), StatusPayload::Unrecognized);
        assert_eq!(sniff(""), StatusPayload::Unrecognized);
    }

    #[test]
    fn garbage_decodes_to_empty_report() {
        for body in ["<XMLResponse><Status>", "{\"Response\":", "503 Service Unavailable"] {
            let report = decode(body);
            assert_eq!(report, StatusReport::default(), "{body}");
            assert_eq!(report.state(), SubsystemStatus::Unknown);
        }
    }
}
