//! Structural and text operations.
//!
//! Every user-visible mutation is described by one [`Operation`] payload and
//! executed by exactly one function. Operations read the mirror for
//! pre-transaction navigation, but re-resolve every sequence index from the
//! live containers at mutation time — a batch of mutations in one
//! transaction shifts indices, so a cached index is never trusted across
//! mutations. Each operation returns the block a caret should land on, or
//! `None` for a no-op.

mod normalize;
mod structural;
mod text;

pub use normalize::{normalize_block, normalize_content};
pub use structural::{
    add_child_block, add_inline_block, delete_content_at_range, merge_block_backward,
    merge_block_forward, move_block, nest_block, push_content_into_block, remove_block,
    remove_inline_block, set_block, split_block, un_nest_block,
};
pub use text::{
    accept_suggested_text, delete_text, insert_text, mark_text, marks_at_range, split_text,
    suggest_text, DeleteDirection,
};

use std::collections::HashMap;

use loro::{Container, ContainerTrait, LoroList, LoroMap, LoroText, LoroValue, ValueOrContainer};
use serde_json::Value as Json;

use crate::model::mirror::Mirror;
use crate::model::node::{BlockId, BlockPath, ContentAddress};
use crate::model::schema::Schema;
use crate::model::value::{BlockValue, ContentValue};
use crate::plugin::PluginRegistry;
use crate::store::{
    apply_mark, json_to_loro, text_segments, MapExt, SeqExt, Store, FIELD_CHILDREN, FIELD_CONTENT,
    FIELD_DATA, FIELD_ID, FIELD_KIND, Marks,
};

/// Discriminated payload, one variant per operation. Plugins may replace a
/// payload before execution.
#[derive(Debug, Clone)]
pub enum Operation {
    SplitBlock {
        block: BlockId,
        at: ContentAddress,
    },
    MergeBlockBackward {
        block: BlockId,
    },
    MergeBlockForward {
        block: BlockId,
    },
    NestBlock {
        block: BlockId,
    },
    UnNestBlock {
        block: BlockId,
    },
    MoveBlock {
        block: BlockId,
        target: BlockPath,
    },
    RemoveBlock {
        block: BlockId,
        keep_children: bool,
    },
    SetBlock {
        block: BlockId,
        value: BlockValue,
    },
    AddChildBlock {
        parent: Option<BlockId>,
        index: usize,
        value: BlockValue,
    },
    PushContent {
        block: BlockId,
        parts: Vec<ContentValue>,
    },
    DeleteContentAtRange {
        block: BlockId,
        start: ContentAddress,
        end: ContentAddress,
    },
    NormalizeContent {
        block: BlockId,
    },
    AddInlineBlock {
        block: BlockId,
        at: ContentAddress,
        value: BlockValue,
    },
    RemoveInlineBlock {
        block: BlockId,
        embed: BlockId,
    },
    SuggestText {
        block: BlockId,
        parts: Vec<ContentValue>,
    },
    AcceptSuggestedText {
        block: BlockId,
    },
    InsertText {
        block: BlockId,
        start: ContentAddress,
        end: ContentAddress,
        text: String,
        marks: Marks,
        /// Retract one prior character first (auto-punctuation, e.g.
        /// double-space substitution).
        auto_dot: bool,
    },
    DeleteText {
        block: BlockId,
        at: ContentAddress,
        direction: DeleteDirection,
        length: usize,
    },
    MarkText {
        block: BlockId,
        start: ContentAddress,
        end: ContentAddress,
        mark: String,
        value: Json,
        toggle: bool,
    },
}

impl Operation {
    /// Stable name plugins key their hooks on.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SplitBlock { .. } => "split_block",
            Operation::MergeBlockBackward { .. } => "merge_block_backward",
            Operation::MergeBlockForward { .. } => "merge_block_forward",
            Operation::NestBlock { .. } => "nest_block",
            Operation::UnNestBlock { .. } => "un_nest_block",
            Operation::MoveBlock { .. } => "move_block",
            Operation::RemoveBlock { .. } => "remove_block",
            Operation::SetBlock { .. } => "set_block",
            Operation::AddChildBlock { .. } => "add_child_block",
            Operation::PushContent { .. } => "push_content_into_block",
            Operation::DeleteContentAtRange { .. } => "delete_content_at_range",
            Operation::NormalizeContent { .. } => "normalize_content",
            Operation::AddInlineBlock { .. } => "add_inline_block",
            Operation::RemoveInlineBlock { .. } => "remove_inline_block",
            Operation::SuggestText { .. } => "suggest_text",
            Operation::AcceptSuggestedText { .. } => "accept_suggested_text",
            Operation::InsertText { .. } => "insert_text",
            Operation::DeleteText { .. } => "delete_text",
            Operation::MarkText { .. } => "mark_text",
        }
    }

    /// The block the payload primarily targets.
    pub fn target(&self) -> Option<&BlockId> {
        match self {
            Operation::SplitBlock { block, .. }
            | Operation::MergeBlockBackward { block }
            | Operation::MergeBlockForward { block }
            | Operation::NestBlock { block }
            | Operation::UnNestBlock { block }
            | Operation::MoveBlock { block, .. }
            | Operation::RemoveBlock { block, .. }
            | Operation::SetBlock { block, .. }
            | Operation::PushContent { block, .. }
            | Operation::DeleteContentAtRange { block, .. }
            | Operation::NormalizeContent { block }
            | Operation::AddInlineBlock { block, .. }
            | Operation::RemoveInlineBlock { block, .. }
            | Operation::SuggestText { block, .. }
            | Operation::AcceptSuggestedText { block }
            | Operation::InsertText { block, .. }
            | Operation::DeleteText { block, .. }
            | Operation::MarkText { block, .. } => Some(block),
            Operation::AddChildBlock { parent, .. } => parent.as_ref(),
        }
    }
}

/// Execution context handed to every operation function. Holds the live
/// document, the (pre-transaction) mirror, and the process-local ghost
/// content staged by `suggest_text`.
pub struct OpCtx<'a> {
    pub store: &'a Store,
    pub mirror: &'a Mirror,
    pub schema: &'a Schema,
    pub plugins: &'a PluginRegistry,
    pub staged: &'a mut HashMap<BlockId, Vec<ContentValue>>,
}

/// Run one operation's mutation body. The caller owns the transaction
/// boundary (commit) and the plugin hook pipeline.
pub fn execute(ctx: &mut OpCtx<'_>, op: &Operation) -> anyhow::Result<Option<BlockId>> {
    match op {
        Operation::SplitBlock { block, at } => split_block(ctx, block, *at),
        Operation::MergeBlockBackward { block } => merge_block_backward(ctx, block),
        Operation::MergeBlockForward { block } => merge_block_forward(ctx, block),
        Operation::NestBlock { block } => nest_block(ctx, block),
        Operation::UnNestBlock { block } => un_nest_block(ctx, block),
        Operation::MoveBlock { block, target } => move_block(ctx, block, target),
        Operation::RemoveBlock {
            block,
            keep_children,
        } => remove_block(ctx, block, *keep_children),
        Operation::SetBlock { block, value } => set_block(ctx, block, value),
        Operation::AddChildBlock {
            parent,
            index,
            value,
        } => add_child_block(ctx, parent.as_ref(), *index, value),
        Operation::PushContent { block, parts } => push_content_into_block(ctx, block, parts),
        Operation::DeleteContentAtRange { block, start, end } => {
            delete_content_at_range(ctx, block, *start, *end)
        }
        Operation::NormalizeContent { block } => normalize_content(ctx, block),
        Operation::AddInlineBlock { block, at, value } => add_inline_block(ctx, block, *at, value),
        Operation::RemoveInlineBlock { block, embed } => remove_inline_block(ctx, block, embed),
        Operation::SuggestText { block, parts } => suggest_text(ctx, block, parts.clone()),
        Operation::AcceptSuggestedText { block } => accept_suggested_text(ctx, block),
        Operation::InsertText {
            block,
            start,
            end,
            text,
            marks,
            auto_dot,
        } => insert_text(ctx, block, *start, *end, text, marks, *auto_dot),
        Operation::DeleteText {
            block,
            at,
            direction,
            length,
        } => delete_text(ctx, block, *at, *direction, *length),
        Operation::MarkText {
            block,
            start,
            end,
            mark,
            value,
            toggle,
        } => mark_text(ctx, block, *start, *end, mark, value, *toggle),
    }
}

// ============ Live container helpers ============

/// A content part read from the live list mid-transaction.
pub(crate) enum LivePart {
    Run(LoroText),
    Embed(LoroMap),
}

impl LivePart {
    pub(crate) fn as_run(&self) -> Option<&LoroText> {
        match self {
            LivePart::Run(text) => Some(text),
            LivePart::Embed(_) => None,
        }
    }
}

pub(crate) fn live_parts(list: &LoroList) -> Vec<LivePart> {
    let mut parts = Vec::new();
    for element in list.elements() {
        match element {
            ValueOrContainer::Container(Container::Text(text)) => parts.push(LivePart::Run(text)),
            ValueOrContainer::Container(Container::Map(map)) => parts.push(LivePart::Embed(map)),
            _ => {}
        }
    }
    parts
}

/// Unicode-scalar length of a live run.
pub(crate) fn run_len(text: &LoroText) -> usize {
    text.len_unicode()
}

/// The sequence a block lives in: its parent's children, or the document's
/// root sequence.
pub(crate) fn containing_list(ctx: &OpCtx<'_>, block: &BlockId) -> Option<LoroList> {
    let node = ctx.mirror.node(block)?;
    match &node.parent {
        Some(parent) => Some(ctx.mirror.node(parent)?.children_list.clone()),
        None => Some(ctx.store.root_children()),
    }
}

/// Current index of a block inside `list`, re-resolved from the live
/// sequence.
pub(crate) fn live_index(ctx: &OpCtx<'_>, list: &LoroList, block: &BlockId) -> Option<usize> {
    let node = ctx.mirror.node(block)?;
    list.index_of_container(&node.map.id())
}

// ============ Literal materialization ============

/// Build a fresh replicated block from a literal at `index` of `list`,
/// recursing into content and children. A literal carrying an id keeps it
/// (that is how copy-and-delete moves preserve identity); otherwise a new id
/// is minted.
pub(crate) fn create_from_value(
    ctx: &OpCtx<'_>,
    list: &LoroList,
    index: usize,
    value: &BlockValue,
) -> anyhow::Result<BlockId> {
    // Unknown kinds are a configuration error, surfaced before any mutation.
    ctx.schema.expect_definition(&value.kind);

    let id = value
        .id
        .clone()
        .map(BlockId::from_string)
        .unwrap_or_else(BlockId::fresh);

    let index = index.min(list.len());
    let map = list.insert_container(index, LoroMap::new())?;
    let (content, children, data) =
        crate::store::init_block_fields(&map, id.as_str(), &value.kind)?;

    write_content_parts(ctx, &content, 0, &value.content)?;
    if content.len() == 0 {
        content.insert_container(0, LoroText::new())?;
    }
    for (child_index, child) in value.children.iter().enumerate() {
        create_from_value(ctx, &children, child_index, child)?;
    }
    for (key, json) in &value.data {
        data.insert(key.as_str(), json_to_loro(json))?;
    }
    Ok(id)
}

/// Materialize literal content parts into a live content list starting at
/// `index`. Consecutive text literals fold into one run; marks are applied
/// per-span. Returns the number of list elements written.
pub(crate) fn write_content_parts(
    ctx: &OpCtx<'_>,
    list: &LoroList,
    index: usize,
    parts: &[ContentValue],
) -> anyhow::Result<usize> {
    let mut written = 0;
    let mut open_run: Option<LoroText> = None;
    for part in parts {
        match part {
            ContentValue::Text { text, marks } => {
                let run = match &open_run {
                    Some(run) => run.clone(),
                    None => {
                        let run = list.insert_container(index + written, LoroText::new())?;
                        written += 1;
                        open_run = Some(run.clone());
                        run
                    }
                };
                append_marked(ctx, &run, text, marks)?;
            }
            ContentValue::Block(embed) => {
                ctx.schema.expect_definition(&embed.kind);
                let id = embed
                    .id
                    .clone()
                    .map(BlockId::from_string)
                    .unwrap_or_else(BlockId::fresh);
                let map = list.insert_container(index + written, LoroMap::new())?;
                let (_, _, data) =
                    crate::store::init_block_fields(&map, id.as_str(), &embed.kind)?;
                for (key, json) in &embed.data {
                    data.insert(key.as_str(), json_to_loro(json))?;
                }
                written += 1;
                open_run = None;
            }
        }
    }
    Ok(written)
}

/// Append `text` with `marks` at the end of a live run.
///
/// The literal's marks are authoritative. Styles configured to expand after
/// their span would otherwise spill from the run's trailing segment into the
/// appended text, so anything inherited that the literal does not carry is
/// cleared before the literal's own marks are applied.
pub(crate) fn append_marked(
    ctx: &OpCtx<'_>,
    run: &LoroText,
    text: &str,
    marks: &Marks,
) -> anyhow::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let inherited: Vec<String> = text_segments(run)
        .last()
        .map(|segment| segment.marks.keys().cloned().collect())
        .unwrap_or_default();
    let start = run_len(run);
    run.insert(start, text)?;
    let end = run_len(run);
    for mark in &inherited {
        if !marks.contains_key(mark) {
            apply_mark(run, start, end, mark, &Json::Null)?;
        }
    }
    for (mark, value) in marks {
        if !ctx.schema.is_registered_mark(mark) {
            anyhow::bail!("mark `{mark}` is not registered in the schema");
        }
        apply_mark(run, start, end, mark, value)?;
    }
    Ok(())
}

/// Read a live block map back into a literal (ids preserved), recursing into
/// content and children. This is the copy half of copy-and-delete moves.
pub(crate) fn literal_of_map(map: &LoroMap) -> Option<BlockValue> {
    let id = map.get_str(FIELD_ID)?;
    let kind = map.get_str(FIELD_KIND)?;
    let content_list = map.get_list_field(FIELD_CONTENT).ok()?;
    let children_list = map.get_list_field(FIELD_CHILDREN).ok()?;
    let data_map = map.get_map_field(FIELD_DATA).ok()?;

    let mut content = Vec::new();
    for part in live_parts(&content_list) {
        match part {
            LivePart::Run(run) => {
                for segment in text_segments(&run) {
                    content.push(ContentValue::Text {
                        text: segment.text,
                        marks: segment.marks,
                    });
                }
            }
            LivePart::Embed(embed) => {
                if let Some(value) = literal_of_map(&embed) {
                    content.push(ContentValue::Block(value));
                }
            }
        }
    }

    let mut children = Vec::new();
    for element in children_list.elements() {
        if let ValueOrContainer::Container(Container::Map(child)) = element {
            if let Some(value) = literal_of_map(&child) {
                children.push(value);
            }
        }
    }

    Some(BlockValue {
        id: Some(id),
        kind,
        content,
        children,
        data: data_map.scalar_entries(),
    })
}

/// Literal copies of a block's live children, for re-hosting them elsewhere.
pub(crate) fn child_literals(children_list: &LoroList) -> Vec<BlockValue> {
    let mut out = Vec::new();
    for element in children_list.elements() {
        if let ValueOrContainer::Container(Container::Map(map)) = element {
            if let Some(value) = literal_of_map(&map) {
                out.push(value);
            }
        }
    }
    out
}

pub(crate) fn insert_literals(
    ctx: &OpCtx<'_>,
    list: &LoroList,
    index: usize,
    values: &[BlockValue],
) -> anyhow::Result<()> {
    for (offset, value) in values.iter().enumerate() {
        create_from_value(ctx, list, index + offset, value)?;
    }
    Ok(())
}

/// Detached copy of a run's suffix starting at `offset`, as literal parts
/// with marks preserved.
pub(crate) fn run_suffix_literal(run: &LoroText, offset: usize) -> Vec<ContentValue> {
    let mut parts = Vec::new();
    let mut consumed = 0;
    for segment in text_segments(run) {
        let seg_len = segment.len();
        let seg_start = consumed;
        consumed += seg_len;
        if consumed <= offset {
            continue;
        }
        let skip = offset.saturating_sub(seg_start);
        let tail: String = segment.text.chars().skip(skip).collect();
        if !tail.is_empty() {
            parts.push(ContentValue::Text {
                text: tail,
                marks: segment.marks,
            });
        }
    }
    parts
}

pub(crate) fn kind_of_map(map: &LoroMap) -> Option<String> {
    map.get_str(FIELD_KIND)
}

pub(crate) fn id_of_map(map: &LoroMap) -> Option<BlockId> {
    map.get_str(FIELD_ID).map(BlockId::from_string)
}

pub(crate) fn data_map_of(map: &LoroMap) -> Option<LoroMap> {
    map.get_map_field(FIELD_DATA).ok()
}

pub(crate) fn content_list_of(map: &LoroMap) -> Option<LoroList> {
    map.get_list_field(FIELD_CONTENT).ok()
}

pub(crate) fn children_list_of(map: &LoroMap) -> Option<LoroList> {
    map.get_list_field(FIELD_CHILDREN).ok()
}

pub(crate) fn set_kind(map: &LoroMap, kind: &str) -> anyhow::Result<()> {
    map.insert(FIELD_KIND, LoroValue::from(kind))?;
    Ok(())
}
