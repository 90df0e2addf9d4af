//! Block-kind registry.
//!
//! Every block kind the editor may see must be registered before the editor
//! starts. Behavioral flags here drive the structural operations: whether a
//! kind carries editable text, may hold children, or appears inline inside
//! another block's content.

use std::collections::BTreeMap;

/// How a block participates in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    /// A normal vertical block (paragraph, heading, list item...).
    Flow,
    /// Lives inside another block's content sequence (mention, inline image).
    Inline,
}

/// Declarative description of one block kind.
#[derive(Debug, Clone)]
pub struct BlockDefinition {
    pub kind: String,
    pub role: BlockRole,
    /// Whether the block carries an editable text body. Inline blocks and
    /// void blocks (divider, image) do not.
    pub editable: bool,
    /// Whether the block may hold nested children.
    pub container: bool,
    /// Kind that a split's trailing half becomes, when different from `kind`.
    /// Splitting a heading yields a paragraph; splitting a list item yields
    /// another list item.
    pub split_kind: Option<String>,
}

impl BlockDefinition {
    pub fn flow(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: BlockRole::Flow,
            editable: true,
            container: true,
            split_kind: None,
        }
    }

    pub fn inline(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: BlockRole::Inline,
            editable: false,
            container: false,
            split_kind: None,
        }
    }

    pub fn void(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn leaf(mut self) -> Self {
        self.container = false;
        self
    }

    pub fn splits_to(mut self, kind: impl Into<String>) -> Self {
        self.split_kind = Some(kind.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("block kind `{0}` registered twice")]
    DuplicateKind(String),
    #[error("mark `{0}` registered twice")]
    DuplicateMark(String),
    #[error("default kind `{0}` is not a registered flow kind")]
    BadDefaultKind(String),
}

/// Immutable registry of block kinds and mark names for one editor.
#[derive(Debug)]
pub struct Schema {
    kinds: BTreeMap<String, BlockDefinition>,
    marks: Vec<String>,
    default_kind: String,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// A minimal schema: paragraphs plus the common formatting marks.
    pub fn basic() -> Self {
        Self::builder()
            .block(BlockDefinition::flow("paragraph"))
            .mark("bold")
            .mark("italic")
            .mark("underline")
            .mark("strike")
            .mark("code")
            .mark("link")
            .build()
            .unwrap_or_else(|e| panic!("built-in schema invalid: {e}"))
    }

    pub fn definition(&self, kind: &str) -> Option<&BlockDefinition> {
        self.kinds.get(kind)
    }

    /// Look up a kind that replicated data claims to exist.
    ///
    /// An unknown kind here means the document was produced by a peer with a
    /// different schema; there is no sensible degraded behavior, so this is
    /// fatal.
    pub fn expect_definition(&self, kind: &str) -> &BlockDefinition {
        self.kinds
            .get(kind)
            .unwrap_or_else(|| panic!("unregistered block kind `{kind}` in document"))
    }

    pub fn is_registered_mark(&self, mark: &str) -> bool {
        self.marks.iter().any(|m| m == mark)
    }

    pub fn marks(&self) -> &[String] {
        &self.marks
    }

    /// Kind used for fresh blocks when the caller does not name one.
    pub fn default_kind(&self) -> &str {
        &self.default_kind
    }

    pub fn is_editable(&self, kind: &str) -> bool {
        self.expect_definition(kind).editable
    }

    pub fn is_container(&self, kind: &str) -> bool {
        self.expect_definition(kind).container
    }

    pub fn is_inline(&self, kind: &str) -> bool {
        self.expect_definition(kind).role == BlockRole::Inline
    }
}

#[derive(Default)]
pub struct SchemaBuilder {
    kinds: Vec<BlockDefinition>,
    marks: Vec<String>,
    default_kind: Option<String>,
}

impl SchemaBuilder {
    pub fn block(mut self, definition: BlockDefinition) -> Self {
        self.kinds.push(definition);
        self
    }

    pub fn mark(mut self, name: impl Into<String>) -> Self {
        self.marks.push(name.into());
        self
    }

    pub fn default_kind(mut self, kind: impl Into<String>) -> Self {
        self.default_kind = Some(kind.into());
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut kinds = BTreeMap::new();
        for definition in self.kinds {
            let kind = definition.kind.clone();
            if kinds.insert(kind.clone(), definition).is_some() {
                return Err(SchemaError::DuplicateKind(kind));
            }
        }
        let mut marks = Vec::new();
        for mark in self.marks {
            if marks.contains(&mark) {
                return Err(SchemaError::DuplicateMark(mark));
            }
            marks.push(mark);
        }
        let default_kind = self.default_kind.unwrap_or_else(|| "paragraph".to_string());
        match kinds.get(&default_kind) {
            Some(def) if def.role == BlockRole::Flow => {}
            _ => return Err(SchemaError::BadDefaultKind(default_kind)),
        }
        Ok(Schema {
            kinds,
            marks,
            default_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ Builder tests ============

    #[test]
    fn test_duplicate_kind_rejected() {
        let result = Schema::builder()
            .block(BlockDefinition::flow("paragraph"))
            .block(BlockDefinition::flow("paragraph"))
            .build();
        assert!(matches!(result, Err(SchemaError::DuplicateKind(_))));
    }

    #[test]
    fn test_default_kind_must_be_flow() {
        let result = Schema::builder()
            .block(BlockDefinition::inline("mention"))
            .default_kind("mention")
            .build();
        assert!(matches!(result, Err(SchemaError::BadDefaultKind(_))));
    }

    #[test]
    fn test_split_kind_follows_definition() {
        let schema = Schema::builder()
            .block(BlockDefinition::flow("paragraph"))
            .block(BlockDefinition::flow("heading").splits_to("paragraph"))
            .build()
            .unwrap();
        assert_eq!(
            schema.expect_definition("heading").split_kind.as_deref(),
            Some("paragraph")
        );
        assert_eq!(schema.expect_definition("paragraph").split_kind, None);
    }

    #[test]
    #[should_panic(expected = "unregistered block kind")]
    fn test_unknown_kind_is_fatal() {
        Schema::basic().expect_definition("table");
    }
}
