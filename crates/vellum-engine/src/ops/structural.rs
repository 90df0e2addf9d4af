//! Structural operations: split, merge, nest, move, remove, reconcile.
//!
//! Cross-container moves are copy-and-delete: the replicated sequences do not
//! support atomic re-parenting, so a moved block is projected to its literal
//! (ids preserved), deleted, and re-created at the destination inside the
//! same transaction. The mirror re-associates the re-created handles by id.

use loro::{Container, ContainerTrait, LoroList, ValueOrContainer};

use crate::model::node::{BlockId, BlockPath, ContentAddress};
use crate::model::value::{BlockValue, ContentValue};
use crate::ops::normalize::normalize_block;
use crate::ops::text::split_text;
use crate::ops::{
    append_marked, child_literals, containing_list, create_from_value, id_of_map, insert_literals,
    literal_of_map, live_index, live_parts, run_len, set_kind, write_content_parts, LivePart,
    OpCtx,
};
use crate::store::{json_to_loro, text_segments, SeqExt};

/// Cut a block at a content address. The suffix of the split run, every later
/// content part, and every child move into a fresh sibling inserted right
/// after the block. Returns the new sibling.
///
/// Splitting at offset 0 leaves an empty first block; splitting at the end
/// yields an empty sibling. Addressing anything but a text run is a no-op.
pub fn split_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    at: ContentAddress,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    let definition = ctx.schema.expect_definition(&node.kind);

    let parts = live_parts(&node.content_list);
    let Some(run) = parts.get(at.part).and_then(LivePart::as_run).cloned() else {
        return Ok(None);
    };

    let mut moved = split_text(&run, at.offset)?;

    for part in parts.iter().skip(at.part + 1) {
        match part {
            LivePart::Run(text) => {
                for segment in text_segments(text) {
                    moved.push(ContentValue::Text {
                        text: segment.text,
                        marks: segment.marks,
                    });
                }
            }
            LivePart::Embed(map) => {
                if let Some(value) = literal_of_map(map) {
                    moved.push(ContentValue::Block(value));
                }
            }
        }
    }
    let trailing = parts.len() - (at.part + 1);
    if trailing > 0 {
        node.content_list.delete(at.part + 1, trailing)?;
    }

    // Children travel with the trailing half; the first half becomes a leaf.
    let children = child_literals(&node.children_list);
    let child_count = node.children_list.len();
    if child_count > 0 {
        node.children_list.delete(0, child_count)?;
    }

    let new_kind = definition
        .split_kind
        .clone()
        .unwrap_or_else(|| ctx.schema.default_kind().to_string());
    let carry_data = new_kind == node.kind;
    let mut value = BlockValue::new(new_kind);
    value.content = moved;
    value.children = children;
    if carry_data {
        value.data = node.data.clone();
    }

    let Some(list) = containing_list(ctx, block) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &list, block) else {
        return Ok(None);
    };
    let new_id = create_from_value(ctx, &list, index + 1, &value)?;

    normalize_block(ctx, &node.map)?;
    if let Some(new_map) = map_at(&list, index + 1) {
        normalize_block(ctx, &new_map)?;
    }
    Ok(Some(new_id))
}

/// Append the block's content onto the block before it (in visual order) and
/// remove the block, un-nesting its children one level into its old slot.
/// Returns the block that now holds the merged content.
///
/// With no previous block, an empty block degrades to a forward merge so an
/// empty leading block still collapses; a non-empty one is a no-op.
pub fn merge_block_backward(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };

    let Some(target_id) = mirror.closest_previous_block(block).cloned() else {
        if node.is_empty() {
            return merge_block_forward(ctx, block);
        }
        return Ok(None);
    };
    let Some(target) = mirror.node(&target_id) else {
        return Ok(None);
    };
    if !ctx.schema.expect_definition(&target.kind).editable {
        return Ok(None);
    }

    let parts = content_literals(&node.content_list);
    append_parts(ctx, &target.content_list, &parts)?;

    let children = child_literals(&node.children_list);
    let Some(list) = containing_list(ctx, block) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &list, block) else {
        return Ok(None);
    };
    list.delete(index, 1)?;
    insert_literals(ctx, &list, index, &children)?;

    normalize_block(ctx, &target.map)?;
    Ok(Some(target_id))
}

/// Pull the next block's (in visual order) content into this one and remove
/// it, re-hosting its children at its old position. Returns the block.
pub fn merge_block_forward(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    let Some(next_id) = mirror.closest_next_block(block).cloned() else {
        return Ok(None);
    };
    let Some(next) = mirror.node(&next_id) else {
        return Ok(None);
    };
    if !ctx.schema.expect_definition(&next.kind).editable {
        return Ok(None);
    }

    let parts = content_literals(&next.content_list);
    append_parts(ctx, &node.content_list, &parts)?;

    let children = child_literals(&next.children_list);
    let Some(list) = containing_list(ctx, &next_id) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &list, &next_id) else {
        return Ok(None);
    };
    list.delete(index, 1)?;
    insert_literals(ctx, &list, index, &children)?;

    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Make the block the last child of its previous sibling, carrying its own
/// children along. Rejected when there is no previous sibling or the sibling
/// cannot hold children (void/island kinds).
pub fn nest_block(ctx: &mut OpCtx<'_>, block: &BlockId) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    let Some(prev_id) = mirror.previous_sibling(block).cloned() else {
        return Ok(None);
    };
    let Some(prev) = mirror.node(&prev_id) else {
        return Ok(None);
    };
    if !ctx.schema.expect_definition(&prev.kind).container {
        return Ok(None);
    }

    let Some(value) = literal_of_map(&node.map) else {
        return Ok(None);
    };
    let Some(list) = containing_list(ctx, block) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &list, block) else {
        return Ok(None);
    };
    list.delete(index, 1)?;
    let target = prev.children_list.clone();
    create_from_value(ctx, &target, target.len(), &value)?;
    Ok(Some(block.clone()))
}

/// Promote the block to a sibling of its parent, right after it. No-op when
/// the block is already at the document root.
pub fn un_nest_block(ctx: &mut OpCtx<'_>, block: &BlockId) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    let Some(parent_id) = node.parent.clone() else {
        return Ok(None);
    };
    let Some(parent) = mirror.node(&parent_id) else {
        return Ok(None);
    };
    let Some(grand_list) = containing_list(ctx, &parent_id) else {
        return Ok(None);
    };
    let Some(value) = literal_of_map(&node.map) else {
        return Ok(None);
    };

    let list = parent.children_list.clone();
    let Some(index) = live_index(ctx, &list, block) else {
        return Ok(None);
    };
    list.delete(index, 1)?;

    let Some(parent_index) = grand_list.index_of_container(&parent.map.id()) else {
        return Ok(None);
    };
    create_from_value(ctx, &grand_list, parent_index + 1, &value)?;
    Ok(Some(block.clone()))
}

/// Move a block to an arbitrary tree path (child indices from the root, the
/// final segment being the insertion index in the post-detach sequence).
/// Rejects empty paths, paths whose intermediate segments do not resolve,
/// destinations inside the block's own subtree, and non-container targets.
pub fn move_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    target: &BlockPath,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    if target.is_empty() {
        return Ok(None);
    }

    let final_index = target[target.len() - 1];
    let destination: LoroList = if target.len() == 1 {
        ctx.store.root_children()
    } else {
        let Some(owner) = mirror.node_at_path(&target[..target.len() - 1]) else {
            return Ok(None);
        };
        if !ctx.schema.expect_definition(&owner.kind).container {
            return Ok(None);
        }
        if mirror.is_ancestor_or_self(block, &owner.id) {
            return Ok(None);
        }
        owner.children_list.clone()
    };

    let Some(value) = literal_of_map(&node.map) else {
        return Ok(None);
    };
    let Some(source) = containing_list(ctx, block) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &source, block) else {
        return Ok(None);
    };
    source.delete(index, 1)?;
    create_from_value(ctx, &destination, final_index, &value)?;
    Ok(Some(block.clone()))
}

/// Delete a block from its parent by current (live-resolved) index. With
/// `keep_children` its children are re-inserted at the same position as
/// standalone blocks. Returns the block a caret should land on.
pub fn remove_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    keep_children: bool,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    let Some(list) = containing_list(ctx, block) else {
        return Ok(None);
    };
    let Some(index) = live_index(ctx, &list, block) else {
        return Ok(None);
    };

    let landing = mirror
        .closest_previous_block(block)
        .cloned()
        .or_else(|| node.parent.clone());

    let children = if keep_children {
        child_literals(&node.children_list)
    } else {
        Vec::new()
    };
    list.delete(index, 1)?;
    if keep_children {
        insert_literals(ctx, &list, index, &children)?;
    }
    Ok(landing)
}

/// Declarative reconcile of a block against a literal: kind, data, and
/// content always replaced wholesale (an empty content vector empties the
/// block, normalization then restores the canonical empty shape), children
/// by index (reusing existing blocks, adding missing ones, trimming
/// surplus, cleared when the literal has none).
pub fn set_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    value: &BlockValue,
) -> anyhow::Result<Option<BlockId>> {
    let mirror = ctx.mirror;
    let Some(node) = mirror.node(block) else {
        return Ok(None);
    };
    ctx.schema.expect_definition(&value.kind);

    if node.kind != value.kind {
        set_kind(&node.map, &value.kind)?;
    }

    for key in node.data.keys() {
        if !value.data.contains_key(key) {
            node.data_map.delete(key)?;
        }
    }
    for (key, json) in &value.data {
        node.data_map.insert(key.as_str(), json_to_loro(json))?;
    }

    let len = node.content_list.len();
    if len > 0 {
        node.content_list.delete(0, len)?;
    }
    write_content_parts(ctx, &node.content_list, 0, &value.content)?;

    if value.children.is_empty() {
        let len = node.children_list.len();
        if len > 0 {
            node.children_list.delete(0, len)?;
        }
    } else {
        let existing = node.children.clone();
        for (index, child_value) in value.children.iter().enumerate() {
            match existing.get(index) {
                Some(child_id) => {
                    set_block(ctx, &child_id.clone(), child_value)?;
                }
                None => {
                    let len = node.children_list.len();
                    create_from_value(ctx, &node.children_list, len, child_value)?;
                }
            }
        }
        let keep = value.children.len();
        let len = node.children_list.len();
        if len > keep {
            node.children_list.delete(keep, len - keep)?;
        }
    }

    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Insert a literal as a child of `parent` (or a root block when `parent` is
/// `None`) at `index`. Returns the created block.
pub fn add_child_block(
    ctx: &mut OpCtx<'_>,
    parent: Option<&BlockId>,
    index: usize,
    value: &BlockValue,
) -> anyhow::Result<Option<BlockId>> {
    let list = match parent {
        None => ctx.store.root_children(),
        Some(parent_id) => {
            let Some(parent_node) = ctx.mirror.node(parent_id) else {
                return Ok(None);
            };
            if !ctx.schema.expect_definition(&parent_node.kind).container {
                return Ok(None);
            }
            parent_node.children_list.clone()
        }
    };
    let id = create_from_value(ctx, &list, index, value)?;
    if let Some(map) = find_map_by_id(&list, &id) {
        normalize_block(ctx, &map)?;
    }
    Ok(Some(id))
}

/// Append already-resolved content parts onto the block's content, folding
/// leading plain text into the existing final run so no adjacent-run
/// violation is emitted.
pub fn push_content_into_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    parts: &[ContentValue],
) -> anyhow::Result<Option<BlockId>> {
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    append_parts(ctx, &node.content_list, parts)?;
    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Delete everything between two content addresses: the start run's suffix,
/// the end run's prefix, and every whole part strictly between. Always
/// normalizes afterwards.
pub fn delete_content_at_range(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    start: ContentAddress,
    end: ContentAddress,
) -> anyhow::Result<Option<BlockId>> {
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    delete_range_raw(&node.content_list, start, end)?;
    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Range deletion without the trailing normalization, for operations that
/// compose it with further edits before repairing.
pub(crate) fn delete_range_raw(
    list: &LoroList,
    start: ContentAddress,
    end: ContentAddress,
) -> anyhow::Result<()> {
    let parts = live_parts(list);
    if start.part >= parts.len() || start >= end {
        return Ok(());
    }
    let end = if end.part >= parts.len() {
        ContentAddress {
            part: parts.len() - 1,
            offset: usize::MAX,
        }
    } else {
        end
    };

    if start.part == end.part {
        match &parts[start.part] {
            LivePart::Run(run) => {
                let len = run_len(run);
                let lo = start.offset.min(len);
                let hi = end.offset.min(len);
                if hi > lo {
                    run.delete(lo, hi - lo)?;
                }
            }
            LivePart::Embed(_) => {
                list.delete(start.part, 1)?;
            }
        }
        return Ok(());
    }

    let mut delete_from = start.part + 1;
    match &parts[start.part] {
        LivePart::Run(run) => {
            let len = run_len(run);
            let lo = start.offset.min(len);
            if len > lo {
                run.delete(lo, len - lo)?;
            }
        }
        LivePart::Embed(_) => delete_from = start.part,
    }

    let mut delete_to = end.part;
    match &parts[end.part] {
        LivePart::Run(run) => {
            let hi = end.offset.min(run_len(run));
            if hi > 0 {
                run.delete(0, hi)?;
            }
        }
        LivePart::Embed(_) => delete_to = end.part + 1,
    }

    if delete_to > delete_from {
        list.delete(delete_from, delete_to - delete_from)?;
    }
    Ok(())
}

/// Insert an inline block at a text address, splitting the surrounding run.
/// Returns the embed's id.
pub fn add_inline_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    at: ContentAddress,
    value: &BlockValue,
) -> anyhow::Result<Option<BlockId>> {
    if !ctx.schema.is_inline(&value.kind) {
        anyhow::bail!("block kind `{}` is not an inline kind", value.kind);
    }
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let parts = live_parts(&node.content_list);
    let Some(run) = parts.get(at.part).and_then(LivePart::as_run).cloned() else {
        return Ok(None);
    };

    let mut embed = value.clone();
    if embed.id.is_none() {
        embed.id = Some(BlockId::fresh().to_string());
    }
    let embed_id = BlockId::from_string(embed.id.clone().unwrap_or_default());

    let suffix = split_text(&run, at.offset)?;
    let mut to_write = vec![ContentValue::Block(embed)];
    to_write.extend(suffix);
    write_content_parts(ctx, &node.content_list, at.part + 1, &to_write)?;

    normalize_block(ctx, &node.map)?;
    Ok(Some(embed_id))
}

/// Remove an inline block from the content by live-resolved index, then
/// repair the surrounding runs.
pub fn remove_inline_block(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    embed: &BlockId,
) -> anyhow::Result<Option<BlockId>> {
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let parts = live_parts(&node.content_list);
    let position = parts.iter().position(|part| match part {
        LivePart::Embed(map) => id_of_map(map).as_ref() == Some(embed),
        LivePart::Run(_) => false,
    });
    let Some(position) = position else {
        return Ok(None);
    };
    node.content_list.delete(position, 1)?;
    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

// ============ Shared helpers ============

/// Literal projection of a live content list.
pub(crate) fn content_literals(list: &LoroList) -> Vec<ContentValue> {
    let mut out = Vec::new();
    for part in live_parts(list) {
        match part {
            LivePart::Run(run) => {
                for segment in text_segments(&run) {
                    out.push(ContentValue::Text {
                        text: segment.text,
                        marks: segment.marks,
                    });
                }
            }
            LivePart::Embed(map) => {
                if let Some(value) = literal_of_map(&map) {
                    out.push(ContentValue::Block(value));
                }
            }
        }
    }
    out
}

/// Append literal parts to a live content list, folding leading text parts
/// into the existing final run.
pub(crate) fn append_parts(
    ctx: &OpCtx<'_>,
    list: &LoroList,
    parts: &[ContentValue],
) -> anyhow::Result<()> {
    let mut remaining = parts;
    if let Some(LivePart::Run(last)) = live_parts(list).last() {
        let mut folded = 0;
        while let Some(ContentValue::Text { text, marks }) = remaining.get(folded) {
            append_marked(ctx, last, text, marks)?;
            folded += 1;
        }
        remaining = &parts[folded..];
    }
    if !remaining.is_empty() {
        write_content_parts(ctx, list, list.len(), remaining)?;
    }
    Ok(())
}

pub(crate) fn map_at(list: &LoroList, index: usize) -> Option<loro::LoroMap> {
    match list.get(index) {
        Some(ValueOrContainer::Container(Container::Map(map))) => Some(map),
        _ => None,
    }
}

/// Locate a block map in a live sequence by its stored id.
pub(crate) fn find_map_by_id(list: &LoroList, id: &BlockId) -> Option<loro::LoroMap> {
    for element in list.elements() {
        if let ValueOrContainer::Container(Container::Map(map)) = element {
            if id_of_map(&map).as_ref() == Some(id) {
                return Some(map);
            }
        }
    }
    None
}
