//! Character-level operations over attributed runs, and mark resolution.
//!
//! Offsets are Unicode scalar indices. A range-replace composes the deletion
//! and the insertion inside one transaction so peers and the history see a
//! single step. Mark toggling follows the entire-range rule: a toggle turns
//! a mark off only when it is active across every character of the range,
//! otherwise it applies the mark.

use serde_json::Value as Json;

use crate::model::node::{BlockId, ContentAddress};
use crate::model::value::ContentValue;
use crate::ops::normalize::normalize_block;
use crate::ops::structural::{append_parts, delete_range_raw};
use crate::ops::{live_parts, run_len, LivePart, OpCtx};
use crate::store::{apply_mark, text_segments, Marks, Segment};

/// Deletion direction for a collapsed caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDirection {
    Backward,
    Forward,
}

/// Insert `text` at `start`, first removing `[start, end)` when the range is
/// non-empty. `marks` are applied to the inserted span (the pending
/// next-insert marks buffer). `auto_dot` retracts one character before the
/// insertion point first, for auto-punctuation substitution.
pub fn insert_text(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    start: ContentAddress,
    end: ContentAddress,
    text: &str,
    marks: &Marks,
    auto_dot: bool,
) -> anyhow::Result<Option<BlockId>> {
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let content = node.content_list.clone();
    if end > start {
        delete_range_raw(&content, start, end)?;
    }

    let parts = live_parts(&content);
    let Some(run) = parts.get(start.part).and_then(LivePart::as_run).cloned() else {
        return Ok(None);
    };
    let mut offset = start.offset.min(run_len(&run));

    if auto_dot && offset > 0 {
        run.delete(offset - 1, 1)?;
        offset -= 1;
    }

    if !text.is_empty() {
        run.insert(offset, text)?;
        let inserted_end = offset + text.chars().count();
        for (mark, value) in marks {
            if !ctx.schema.is_registered_mark(mark) {
                anyhow::bail!("mark `{mark}` is not registered in the schema");
            }
            apply_mark(&run, offset, inserted_end, mark, value)?;
        }
    }

    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Detach the suffix of a live run at `offset`, returning it as literal
/// parts with marks preserved. The run keeps the prefix. This is the text
/// half of a block split and of inline-block insertion.
pub fn split_text(run: &loro::LoroText, offset: usize) -> anyhow::Result<Vec<ContentValue>> {
    let suffix = crate::ops::run_suffix_literal(run, offset);
    let len = run_len(run);
    if offset < len {
        run.delete(offset, len - offset)?;
    }
    Ok(suffix)
}

/// Delete `length` characters (at least one) from a caret position, backward
/// or forward within the addressed run. Deleting past the run's edge is a
/// no-op; block-joining lives in the merge operations.
pub fn delete_text(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    at: ContentAddress,
    direction: DeleteDirection,
    length: usize,
) -> anyhow::Result<Option<BlockId>> {
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let parts = live_parts(&node.content_list);
    let Some(run) = parts.get(at.part).and_then(LivePart::as_run).cloned() else {
        return Ok(None);
    };
    let len = run_len(&run);
    let offset = at.offset.min(len);
    let length = length.max(1);

    match direction {
        DeleteDirection::Backward => {
            let from = offset.saturating_sub(length);
            if offset == from {
                return Ok(None);
            }
            run.delete(from, offset - from)?;
        }
        DeleteDirection::Forward => {
            let to = (offset + length).min(len);
            if to == offset {
                return Ok(None);
            }
            run.delete(offset, to - offset)?;
        }
    }

    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

/// Apply (or toggle) a mark over `[start, end)` within one block. A collapsed
/// range is a no-op here — the editor mutates its pending-marks buffer
/// instead. Multi-block ranges are out of scope and return `None`.
pub fn mark_text(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    start: ContentAddress,
    end: ContentAddress,
    mark: &str,
    value: &Json,
    toggle: bool,
) -> anyhow::Result<Option<BlockId>> {
    if !ctx.schema.is_registered_mark(mark) {
        anyhow::bail!("mark `{mark}` is not registered in the schema");
    }
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    if start == end {
        return Ok(None);
    }

    let parts = live_parts(&node.content_list);
    let mut spans = Vec::new();
    for part in start.part..=end.part.min(parts.len().saturating_sub(1)) {
        let Some(run) = parts.get(part).and_then(LivePart::as_run) else {
            continue;
        };
        let len = run_len(run);
        let lo = if part == start.part { start.offset.min(len) } else { 0 };
        let hi = if part == end.part { end.offset.min(len) } else { len };
        if hi > lo {
            spans.push((run.clone(), lo, hi));
        }
    }
    if spans.is_empty() {
        return Ok(None);
    }

    let effective = if toggle && mark_active_everywhere(&spans, mark) {
        Json::Null
    } else {
        value.clone()
    };
    for (run, lo, hi) in &spans {
        apply_mark(run, *lo, *hi, mark, &effective)?;
    }

    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}

fn mark_active_everywhere(spans: &[(loro::LoroText, usize, usize)], mark: &str) -> bool {
    let mut saw_text = false;
    for (run, lo, hi) in spans {
        for segment in slice_segments(&text_segments(run), *lo, *hi) {
            if segment.text.is_empty() {
                continue;
            }
            saw_text = true;
            if !segment.marks.contains_key(mark) {
                return false;
            }
        }
    }
    saw_text
}

/// The uniformly-marked spans intersecting a range of one block's content:
/// the shared primitive behind both mark toggling and "what formatting is
/// active here" queries. Boundary segments are sliced to the exact range.
pub fn marks_at_range(
    ctx: &OpCtx<'_>,
    block: &BlockId,
    start: ContentAddress,
    end: ContentAddress,
) -> Vec<Segment> {
    let Some(node) = ctx.mirror.node(block) else {
        return Vec::new();
    };
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    let mut out = Vec::new();
    for (part_index, part) in node.content.iter().enumerate() {
        if part_index < start.part || part_index > end.part {
            continue;
        }
        let Some(run) = part.as_run() else { continue };
        let len = run.len();
        let lo = if part_index == start.part {
            start.offset.min(len)
        } else {
            0
        };
        let hi = if part_index == end.part {
            end.offset.min(len)
        } else {
            len
        };
        out.extend(slice_segments(&run.segments, lo, hi));
    }
    out
}

/// Slice a run's segment decomposition to `[start, end)`, trimming the
/// boundary segments' text to the exact offsets.
pub(crate) fn slice_segments(segments: &[Segment], start: usize, end: usize) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut consumed = 0;
    for segment in segments {
        let seg_start = consumed;
        let seg_end = consumed + segment.len();
        consumed = seg_end;
        if seg_end <= start {
            continue;
        }
        if seg_start >= end {
            break;
        }
        let from = start.saturating_sub(seg_start);
        let to = end.min(seg_end) - seg_start;
        let text: String = segment
            .text
            .chars()
            .skip(from)
            .take(to.saturating_sub(from))
            .collect();
        if !text.is_empty() {
            out.push(Segment {
                text,
                marks: segment.marks.clone(),
            });
        }
    }
    out
}

// ============ Suggested ("ghost") content ============

/// Stage ghost content for a block. Staged content is process-local — it is
/// not replicated and peers never see it until accepted.
pub fn suggest_text(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
    parts: Vec<ContentValue>,
) -> anyhow::Result<Option<BlockId>> {
    if !ctx.mirror.contains(block) {
        return Ok(None);
    }
    ctx.staged.insert(block.clone(), parts);
    Ok(Some(block.clone()))
}

/// Commit the staged ghost content by splicing it into the block's real
/// content, then normalizing. No-op when nothing is staged.
pub fn accept_suggested_text(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
) -> anyhow::Result<Option<BlockId>> {
    let Some(parts) = ctx.staged.remove(block) else {
        return Ok(None);
    };
    let Some(node) = ctx.mirror.node(block) else {
        return Ok(None);
    };
    append_parts(ctx, &node.content_list, &parts)?;
    normalize_block(ctx, &node.map)?;
    Ok(Some(block.clone()))
}
