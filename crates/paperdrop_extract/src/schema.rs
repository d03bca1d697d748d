//! Wire schema for the ingestion API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub text: String,
}

/// The JSON document posted to the ingestion endpoint and archived as the
/// derived blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub filename: String,
    pub sha256: String,
    pub pages: Vec<Page>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_the_expected_shape() {
        let payload = DocumentPayload {
            filename: "invoice.pdf".to_string(),
            sha256: "abc123".to_string(),
            pages: vec![Page {
                page: 1,
                text: "Invoice #42".to_string(),
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "filename": "invoice.pdf",
                "sha256": "abc123",
                "pages": [{"page": 1, "text": "Invoice #42"}],
            })
        );
    }
}
