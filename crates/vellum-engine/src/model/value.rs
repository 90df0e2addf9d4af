//! Literal document values.
//!
//! A [`BlockValue`] tree is the plain-data projection of a document: what you
//! get out of [`crate::Editor::value`] and what you feed in to build one. It
//! carries no CRDT identity — two documents with the same literal compare
//! equal even if their edit histories differ.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::store::Marks;

/// One block in literal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockValue {
    /// Stable identifier. Omitted from comparisons via [`BlockValue::without_ids`];
    /// `None` in a literal means "assign a fresh id on insert".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Json>,
}

/// One content part in literal form: a marked text span or an inline block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        marks: Marks,
    },
    Block(BlockValue),
}

impl BlockValue {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            content: Vec::new(),
            children: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_text(kind: impl Into<String>, text: impl Into<String>) -> Self {
        let mut block = Self::new(kind);
        block.content.push(ContentValue::plain(text));
        block
    }

    pub fn with_content(mut self, content: Vec<ContentValue>) -> Self {
        self.content = content;
        self
    }

    pub fn with_children(mut self, children: Vec<BlockValue>) -> Self {
        self.children = children;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Json) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Concatenated plain text of this block's own content (inline blocks
    /// contribute nothing).
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentValue::Text { text, .. } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Copy with every block id stripped, for identity-insensitive comparison.
    pub fn without_ids(&self) -> BlockValue {
        BlockValue {
            id: None,
            kind: self.kind.clone(),
            content: self
                .content
                .iter()
                .map(|part| match part {
                    ContentValue::Text { text, marks } => ContentValue::Text {
                        text: text.clone(),
                        marks: marks.clone(),
                    },
                    ContentValue::Block(b) => ContentValue::Block(b.without_ids()),
                })
                .collect(),
            children: self.children.iter().map(BlockValue::without_ids).collect(),
            data: self.data.clone(),
        }
    }
}

impl ContentValue {
    pub fn plain(text: impl Into<String>) -> Self {
        ContentValue::Text {
            text: text.into(),
            marks: Marks::new(),
        }
    }

    pub fn marked(text: impl Into<String>, marks: Marks) -> Self {
        ContentValue::Text {
            text: text.into(),
            marks,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, ContentValue::Text { text, .. } if text.is_empty())
    }
}

/// Merge adjacent text parts that carry identical marks and drop empty text
/// parts, keeping one empty part when the content would otherwise be empty.
/// Literal-level counterpart of content normalization.
pub fn coalesce(parts: Vec<ContentValue>) -> Vec<ContentValue> {
    let mut out: Vec<ContentValue> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            ContentValue::Text { text, marks } => {
                if text.is_empty() {
                    continue;
                }
                match out.last_mut() {
                    Some(ContentValue::Text {
                        text: prev,
                        marks: prev_marks,
                    }) if *prev_marks == marks => prev.push_str(&text),
                    _ => out.push(ContentValue::Text { text, marks }),
                }
            }
            block => out.push(block),
        }
    }
    if out.is_empty() {
        out.push(ContentValue::plain(""));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ============ Serde format tests ============

    #[test]
    fn test_block_value_json_shape() {
        let block = BlockValue::with_text("paragraph", "Hello")
            .with_data("align", json!("center"));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "paragraph",
                "content": [{"text": "Hello"}],
                "data": {"align": "center"}
            })
        );
    }

    #[test]
    fn test_content_value_untagged_parse() {
        let parsed: ContentValue =
            serde_json::from_value(json!({"text": "hi", "marks": {"bold": true}})).unwrap();
        match parsed {
            ContentValue::Text { text, marks } => {
                assert_eq!(text, "hi");
                assert_eq!(marks.get("bold"), Some(&json!(true)));
            }
            _ => panic!("expected text part"),
        }

        let parsed: ContentValue =
            serde_json::from_value(json!({"type": "mention", "data": {"user": "ada"}})).unwrap();
        assert!(matches!(parsed, ContentValue::Block(_)));
    }

    #[test]
    fn test_without_ids_strips_recursively() {
        let mut block = BlockValue::with_text("paragraph", "x");
        block.id = Some("outer".into());
        let mut child = BlockValue::new("paragraph");
        child.id = Some("inner".into());
        block.children.push(child);

        let stripped = block.without_ids();
        assert!(stripped.id.is_none());
        assert!(stripped.children[0].id.is_none());
    }

    // ============ Coalesce tests ============

    #[test]
    fn test_coalesce_merges_same_marks() {
        let parts = coalesce(vec![
            ContentValue::plain("Hel"),
            ContentValue::plain("lo"),
        ]);
        assert_eq!(parts, vec![ContentValue::plain("Hello")]);
    }

    #[test]
    fn test_coalesce_keeps_distinct_marks_apart() {
        let mut bold = Marks::new();
        bold.insert("bold".into(), json!(true));
        let parts = coalesce(vec![
            ContentValue::plain("a"),
            ContentValue::marked("b", bold),
        ]);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_coalesce_drops_empty_but_never_all() {
        let parts = coalesce(vec![ContentValue::plain(""), ContentValue::plain("")]);
        assert_eq!(parts, vec![ContentValue::plain("")]);
    }
}
