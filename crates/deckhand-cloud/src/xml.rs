// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal XML helpers for the cloud APIs' response envelopes.

use crate::error::{CloudError, CloudErrorKind, Result};

/// Parse an XML document.
pub fn parse(text: &str) -> Result<roxmltree::Document<'_>> {
    roxmltree::Document::parse(text)
        .map_err(|e| CloudError::new(CloudErrorKind::Api, format!("bad XML response: {}", e)))
}

/// Text of the first element with the given tag name, anywhere in the tree.
pub fn text_of(doc: &roxmltree::Document<'_>, tag: &str) -> Option<String> {
    doc.descendants()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

/// Texts of every element with the given tag name, in document order.
pub fn texts_of(doc: &roxmltree::Document<'_>, tag: &str) -> Vec<String> {
    doc.descendants()
        .filter(|n| n.has_tag_name(tag))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .collect()
}

/// Extract (code, message) from an error envelope; tolerates non-XML bodies.
pub fn parse_error(text: &str) -> (String, String) {
    match roxmltree::Document::parse(text) {
        Ok(doc) => {
            let code = text_of(&doc, "Code").unwrap_or_else(|| "Unknown".to_string());
            let message = text_of(&doc, "Message").unwrap_or_else(|| text.trim().to_string());
            (code, message)
        }
        Err(_) => ("Unknown".to_string(), text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope() {
        let body = r#"<ErrorResponse>
            <Error>
              <Type>Sender</Type>
              <Code>NoSuchEntity</Code>
              <Message>The role with name missing-role cannot be found.</Message>
            </Error>
        </ErrorResponse>"#;
        let (code, message) = parse_error(body);
        assert_eq!(code, "NoSuchEntity");
        assert!(message.contains("missing-role"));
    }

    #[test]
    fn test_non_xml_error_body() {
        let (code, message) = parse_error("upstream exploded");
        assert_eq!(code, "Unknown");
        assert_eq!(message, "upstream exploded");
    }

    #[test]
    fn test_texts_of_collects_in_order() {
        let body = "<r><Member>a</Member><Member>b</Member></r>";
        let doc = parse(body).unwrap();
        assert_eq!(texts_of(&doc, "Member"), vec!["a", "b"]);
    }
}
