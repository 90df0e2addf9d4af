//! In-memory mirror nodes.
//!
//! The mirror keeps one [`Node`] per live block, flat in an id-keyed table
//! rather than as an owned tree, so any block is addressable in O(1) and
//! re-parenting is a field update. Each node pairs cached plain-data fields
//! (for reads) with live container handles (for writes); the cached side is
//! only ever written by the change observer.

use std::collections::BTreeMap;
use std::fmt;

use loro::{LoroList, LoroMap, LoroText};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::store::Segment;

/// Stable block identifier, carried in the replicated data.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn fresh() -> Self {
        BlockId(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        BlockId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", &self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        BlockId(s.to_string())
    }
}

/// Structural path of a block: child indices from the document root.
pub type BlockPath = Vec<usize>;

/// A position inside a block's content: which part, and for text parts, the
/// character offset inside it. Offsets count Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContentAddress {
    pub part: usize,
    pub offset: usize,
}

impl ContentAddress {
    pub fn start() -> Self {
        Self { part: 0, offset: 0 }
    }
}

/// One attributed text run: the live handle plus a cached decomposition.
#[derive(Debug, Clone)]
pub struct TextRun {
    pub handle: LoroText,
    /// Cached plain text, refreshed by the observer after every change batch.
    pub text: String,
    /// Cached uniformly-marked spans, same refresh discipline.
    pub segments: Vec<Segment>,
}

impl TextRun {
    /// Length in Unicode scalar values.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// One part of a block's content sequence.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Run(TextRun),
    /// Inline block, stored as a full node in the mirror table.
    Embed(BlockId),
}

impl ContentPart {
    pub fn as_run(&self) -> Option<&TextRun> {
        match self {
            ContentPart::Run(run) => Some(run),
            ContentPart::Embed(_) => None,
        }
    }
}

/// Mirror entry for one live block.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: BlockId,
    pub kind: String,

    // Live container handles; mutations go through these.
    pub map: LoroMap,
    pub content_list: LoroList,
    pub children_list: LoroList,
    pub data_map: LoroMap,

    // Cached projection, observer-maintained.
    pub content: Vec<ContentPart>,
    pub children: Vec<BlockId>,
    pub data: BTreeMap<String, Json>,

    // Derived placement, recomputed after every change batch.
    pub parent: Option<BlockId>,
    pub index: usize,
    pub depth: usize,
}

impl Node {
    /// Concatenated plain text of the block's own content.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Run(run) = part {
                out.push_str(&run.text);
            }
        }
        out
    }

    /// Total text length in Unicode scalar values.
    pub fn text_len(&self) -> usize {
        self.content
            .iter()
            .filter_map(ContentPart::as_run)
            .map(TextRun::len)
            .sum()
    }

    /// Whether the block holds no text, no inline blocks, and no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
            && self.content.iter().all(|part| match part {
                ContentPart::Run(run) => run.is_empty(),
                ContentPart::Embed(_) => false,
            })
    }

    /// Address of the end of the block's content.
    pub fn end_address(&self) -> ContentAddress {
        match self.content.len().checked_sub(1) {
            Some(part) => {
                let offset = self.content[part]
                    .as_run()
                    .map(TextRun::len)
                    .unwrap_or(0);
                ContentAddress { part, offset }
            }
            None => ContentAddress::start(),
        }
    }

    /// Index of the last content part that is a text run.
    pub fn last_run_index(&self) -> Option<usize> {
        self.content
            .iter()
            .rposition(|part| matches!(part, ContentPart::Run(_)))
    }
}
