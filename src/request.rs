//! Conversion requests and their validation at the service boundary.
//!
//! The wire payload is loosely typed (`{"type": "...", "data": {...}}`) and
//! the shape of `data` depends on `type`. [`RawConversionRequest`] captures
//! it verbatim; `TryFrom` turns it into the [`ConversionRequest`] sum type or
//! fails with [`Doc2MdError::BadRequest`]. Nothing past the boundary ever
//! sees an unvalidated payload.

use crate::error::Doc2MdError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Untyped request body as received from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConversionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// A validated conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionRequest {
    /// A remote PDF.
    Pdf { uri: String },
    /// An arXiv paper, fetched as its LaTeX e-print source.
    Arxiv { paper_id: String },
}

/// Discriminant of [`ConversionRequest`], used to pick a converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Pdf,
    Arxiv,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Pdf => f.write_str("pdf"),
            RequestKind::Arxiv => f.write_str("arxiv"),
        }
    }
}

impl ConversionRequest {
    pub fn pdf(uri: impl Into<String>) -> Self {
        ConversionRequest::Pdf { uri: uri.into() }
    }

    pub fn arxiv(paper_id: impl Into<String>) -> Self {
        ConversionRequest::Arxiv {
            paper_id: paper_id.into(),
        }
    }

    /// The string the cache key is derived from.
    pub fn identity(&self) -> &str {
        match self {
            ConversionRequest::Pdf { uri } => uri,
            ConversionRequest::Arxiv { paper_id } => paper_id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            ConversionRequest::Pdf { .. } => RequestKind::Pdf,
            ConversionRequest::Arxiv { .. } => RequestKind::Arxiv,
        }
    }
}

impl TryFrom<RawConversionRequest> for ConversionRequest {
    type Error = Doc2MdError;

    fn try_from(raw: RawConversionRequest) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "pdf" => required_str(&raw.data, "uri").map(ConversionRequest::pdf),
            "arxiv" => required_str(&raw.data, "arxiv_id").map(ConversionRequest::arxiv),
            _ => Err(Doc2MdError::BadRequest("Unknown conversion type".into())),
        }
    }
}

/// Parse and validate a JSON body in one step.
pub fn parse_request(body: &[u8]) -> Result<ConversionRequest, Doc2MdError> {
    let raw: RawConversionRequest = serde_json::from_slice(body)
        .map_err(|e| Doc2MdError::BadRequest(format!("Malformed request body: {e}")))?;
    ConversionRequest::try_from(raw)
}

fn required_str(data: &Value, field: &str) -> Result<String, Doc2MdError> {
    match data.get(field).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(Doc2MdError::BadRequest(format!(
            "Field 'data.{field}' must be a non-empty string"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: &str, data: Value) -> RawConversionRequest {
        RawConversionRequest {
            kind: kind.into(),
            data,
        }
    }

    #[test]
    fn pdf_request_validates() {
        let req = ConversionRequest::try_from(raw("pdf", json!({"uri": "https://example.com/a.pdf"})))
            .unwrap();
        assert_eq!(req, ConversionRequest::pdf("https://example.com/a.pdf"));
        assert_eq!(req.identity(), "https://example.com/a.pdf");
        assert_eq!(req.kind(), RequestKind::Pdf);
    }

    #[test]
    fn arxiv_request_validates() {
        let req = ConversionRequest::try_from(raw("arxiv", json!({"arxiv_id": "1706.03762"}))).unwrap();
        assert_eq!(req.identity(), "1706.03762");
        assert_eq!(req.kind(), RequestKind::Arxiv);
    }

    #[test]
    fn unknown_type_is_bad_request() {
        let err = ConversionRequest::try_from(raw("docx", json!({"uri": "x"}))).unwrap_err();
        assert!(matches!(err, Doc2MdError::BadRequest(ref m) if m == "Unknown conversion type"));
    }

    #[test]
    fn mismatched_data_shape_is_bad_request() {
        let err = ConversionRequest::try_from(raw("pdf", json!({"arxiv_id": "1706.03762"}))).unwrap_err();
        assert!(err.to_string().contains("data.uri"));

        let err = ConversionRequest::try_from(raw("arxiv", json!({"arxiv_id": 42}))).unwrap_err();
        assert!(err.to_string().contains("data.arxiv_id"));

        let err = ConversionRequest::try_from(raw("arxiv", json!({"arxiv_id": "   "}))).unwrap_err();
        assert!(matches!(err, Doc2MdError::BadRequest(_)));
    }

    #[test]
    fn parse_request_from_json_body() {
        let body = br#"{"type": "pdf", "data": {"uri": "https://example.com/a.pdf"}}"#;
        assert_eq!(
            parse_request(body).unwrap(),
            ConversionRequest::pdf("https://example.com/a.pdf")
        );

        let err = parse_request(b"{not json").unwrap_err();
        assert!(err.to_string().starts_with("Malformed request body"));

        let err = parse_request(br#"{"data": {"uri": "x"}}"#).unwrap_err();
        assert!(matches!(err, Doc2MdError::BadRequest(_)));
    }
}
