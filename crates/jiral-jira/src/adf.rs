//! Atlassian Document Format, the rich-text shape Jira Cloud expects for
//! descriptions and comments.

use serde_json::{json, Value};

/// A document holding one paragraph of plain text.
pub fn paragraph_doc(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [
            {
                "type": "paragraph",
                "content": [{"type": "text", "text": text}]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_paragraph() {
        let doc = paragraph_doc("Steps to reproduce");
        assert_eq!(doc["type"], "doc");
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["content"][0]["type"], "paragraph");
        assert_eq!(doc["content"][0]["content"][0]["text"], "Steps to reproduce");
    }
}
