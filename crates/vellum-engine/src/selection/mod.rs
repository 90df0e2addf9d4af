//! Selection and range resolution.
//!
//! The UI reports raw selection events naming opaque view nodes plus integer
//! offsets. Resolution maps both endpoints to (block, content address)
//! coordinates through the attach tables, normalizes them into document
//! order, and swaps in an immutable snapshot. Unresolvable events are
//! discarded wholesale — the previous snapshot stays authoritative rather
//! than ever exposing a partially-invalid one.
//!
//! Selecting whole blocks is a parallel, explicitly-toggled mode entered via
//! commands (select-all escalates text range → block → every block), not via
//! the native selection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use loro::cursor::Cursor;

use crate::model::mirror::Mirror;
use crate::model::node::{BlockId, ContentAddress, ContentPart};
use crate::store::Store;

/// Opaque identifier of a mounted view node, minted by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// What a view node renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewTarget {
    Block(BlockId),
    Run { block: BlockId, part: usize },
}

/// Both directions of the view ↔ model lookup, populated by the UI's
/// mount/unmount callbacks.
#[derive(Default)]
pub struct ViewRegistry {
    targets: HashMap<ViewId, ViewTarget>,
    views: HashMap<BlockId, BTreeSet<ViewId>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_block_view(&mut self, view: ViewId, block: BlockId) {
        self.views.entry(block.clone()).or_default().insert(view);
        self.targets.insert(view, ViewTarget::Block(block));
    }

    pub fn attach_run_view(&mut self, view: ViewId, block: BlockId, part: usize) {
        self.views.entry(block.clone()).or_default().insert(view);
        self.targets.insert(view, ViewTarget::Run { block, part });
    }

    pub fn detach_view(&mut self, view: ViewId) {
        if let Some(target) = self.targets.remove(&view) {
            let block = match target {
                ViewTarget::Block(block) | ViewTarget::Run { block, .. } => block,
            };
            if let Some(set) = self.views.get_mut(&block) {
                set.remove(&view);
                if set.is_empty() {
                    self.views.remove(&block);
                }
            }
        }
    }

    pub fn target(&self, view: ViewId) -> Option<&ViewTarget> {
        self.targets.get(&view)
    }

    pub fn views_of(&self, block: &BlockId) -> impl Iterator<Item = ViewId> + '_ {
        self.views.get(block).into_iter().flatten().copied()
    }
}

/// A raw, UI-owned selection event: anchor/focus view nodes and offsets, in
/// whatever order the user dragged them.
#[derive(Debug, Clone)]
pub struct RawSelection {
    pub anchor_view: ViewId,
    pub anchor_offset: usize,
    pub focus_view: ViewId,
    pub focus_offset: usize,
}

/// One resolved endpoint: a block plus an address into its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPoint {
    pub block: BlockId,
    pub at: ContentAddress,
}

/// The immutable resolved-selection snapshot, replaced wholesale on every
/// raw event.
#[derive(Clone)]
pub struct SelectionSnapshot {
    pub start: TextPoint,
    pub end: TextPoint,
    pub is_collapsed: bool,
    /// Caret sits at the very start of the start block's content.
    pub is_at_start: bool,
    /// Caret sits at the very end of the end block's content.
    pub is_at_end: bool,
    /// Endpoints fall in different text runs.
    pub is_text_spanning: bool,
    /// Durable token for the start position, valid across concurrent edits.
    pub anchor: Option<Cursor>,
}

impl std::fmt::Debug for SelectionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionSnapshot")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("is_collapsed", &self.is_collapsed)
            .field("is_at_start", &self.is_at_start)
            .field("is_at_end", &self.is_at_end)
            .field("is_text_spanning", &self.is_text_spanning)
            .finish_non_exhaustive()
    }
}

/// Selection state owned by one editor: the latest resolved snapshot plus
/// the explicit block multi-select sets.
#[derive(Default)]
pub struct SelectionModel {
    snapshot: Option<Arc<SelectionSnapshot>>,
    selected_blocks: BTreeSet<BlockId>,
    focused_blocks: BTreeSet<BlockId>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&Arc<SelectionSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn selected_blocks(&self) -> &BTreeSet<BlockId> {
        &self.selected_blocks
    }

    pub fn focused_blocks(&self) -> &BTreeSet<BlockId> {
        &self.focused_blocks
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
        self.selected_blocks.clear();
        self.focused_blocks.clear();
    }

    /// Resolve a raw event into a fresh snapshot. An unresolvable event is
    /// discarded and the previous snapshot kept.
    pub fn on_raw_selection(
        &mut self,
        raw: &RawSelection,
        registry: &ViewRegistry,
        mirror: &Mirror,
        store: &Store,
    ) -> bool {
        let Some(snapshot) = resolve(raw, registry, mirror, store) else {
            return false;
        };
        refresh_focused(&snapshot, mirror, &mut self.focused_blocks);
        self.selected_blocks.clear();
        self.snapshot = Some(Arc::new(snapshot));
        true
    }

    /// Place a collapsed caret programmatically (used after structural
    /// operations to restore cursor continuity).
    pub fn set_caret(&mut self, mirror: &Mirror, store: &Store, block: BlockId, at: ContentAddress) {
        let Some(node) = mirror.node(&block) else {
            return;
        };
        let at = clamp_address(node, at);
        let anchor = node
            .content
            .get(at.part)
            .and_then(ContentPart::as_run)
            .and_then(|run| store.caret_token(&run.handle, at.offset));
        let point = TextPoint { block, at };
        let snapshot = SelectionSnapshot {
            is_at_start: at == ContentAddress::start(),
            is_at_end: at == node.end_address(),
            start: point.clone(),
            end: point,
            is_collapsed: true,
            is_text_spanning: false,
            anchor,
        };
        refresh_focused(&snapshot, mirror, &mut self.focused_blocks);
        self.selected_blocks.clear();
        self.snapshot = Some(Arc::new(snapshot));
    }

    /// Re-resolve the snapshot after a transaction via the durable anchor
    /// token. A snapshot whose position no longer exists is dropped.
    pub fn restore(&mut self, mirror: &Mirror, store: &Store) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let block = snapshot.start.block.clone();
        let Some(node) = mirror.node(&block) else {
            return;
        };
        let offset = snapshot
            .anchor
            .as_ref()
            .and_then(|token| store.resolve_caret(token));
        let at = match offset {
            Some(offset) => clamp_address(
                node,
                ContentAddress {
                    part: snapshot.start.at.part,
                    offset,
                },
            ),
            None => clamp_address(node, snapshot.start.at),
        };
        self.set_caret(mirror, store, block, at);
    }

    /// Select-all escalation: a text range selects its block; a block
    /// selection (or repeat) selects every block in the document.
    pub fn escalate_select_all(&mut self, mirror: &Mirror) {
        if self.selected_blocks.is_empty() {
            if let Some(snapshot) = &self.snapshot {
                let mut blocks = BTreeSet::new();
                blocks.insert(snapshot.start.block.clone());
                blocks.insert(snapshot.end.block.clone());
                self.selected_blocks = blocks;
                return;
            }
        }
        self.selected_blocks = mirror.flow_order().into_iter().collect();
    }
}

/// Map a raw event to a resolved snapshot, or `None` when an endpoint cannot
/// be resolved to a text run.
pub fn resolve(
    raw: &RawSelection,
    registry: &ViewRegistry,
    mirror: &Mirror,
    store: &Store,
) -> Option<SelectionSnapshot> {
    let anchor = resolve_endpoint(raw.anchor_view, raw.anchor_offset, registry, mirror)?;
    let focus = resolve_endpoint(raw.focus_view, raw.focus_offset, registry, mirror)?;

    let (start, end) = order_points(anchor, focus, mirror)?;
    let start_node = mirror.node(&start.block)?;
    let end_node = mirror.node(&end.block)?;

    let is_collapsed = start == end;
    let is_text_spanning = start.block != end.block || start.at.part != end.at.part;
    let anchor_token = start_node
        .content
        .get(start.at.part)
        .and_then(ContentPart::as_run)
        .and_then(|run| store.caret_token(&run.handle, start.at.offset));

    Some(SelectionSnapshot {
        is_at_start: start.at == ContentAddress::start(),
        is_at_end: end.at == end_node.end_address(),
        start,
        end,
        is_collapsed,
        is_text_spanning,
        anchor: anchor_token,
    })
}

/// Resolve one endpoint. A view attached to a run resolves directly; one
/// attached to the block itself falls back to the block's first run, then to
/// the previous block's last run (tolerating an anchor that landed just
/// outside the expected span).
fn resolve_endpoint(
    view: ViewId,
    offset: usize,
    registry: &ViewRegistry,
    mirror: &Mirror,
) -> Option<TextPoint> {
    match registry.target(view)? {
        ViewTarget::Run { block, part } => {
            let node = mirror.node(block)?;
            node.content.get(*part)?.as_run()?;
            Some(TextPoint {
                block: block.clone(),
                at: clamp_address(
                    node,
                    ContentAddress {
                        part: *part,
                        offset,
                    },
                ),
            })
        }
        ViewTarget::Block(block) => {
            let node = mirror.node(block)?;
            if let Some(part) = node
                .content
                .iter()
                .position(|p| matches!(p, ContentPart::Run(_)))
            {
                return Some(TextPoint {
                    block: block.clone(),
                    at: clamp_address(node, ContentAddress { part, offset }),
                });
            }
            // No run in this block (void kind): search backwards.
            let prev = mirror.closest_previous_block(block)?;
            let prev_node = mirror.node(prev)?;
            let part = prev_node.last_run_index()?;
            Some(TextPoint {
                block: prev.clone(),
                at: clamp_address(
                    prev_node,
                    ContentAddress {
                        part,
                        offset: usize::MAX,
                    },
                ),
            })
        }
    }
}

/// Normalize two endpoints into document order.
fn order_points(
    a: TextPoint,
    b: TextPoint,
    mirror: &Mirror,
) -> Option<(TextPoint, TextPoint)> {
    if a.block == b.block {
        return Some(if b.at < a.at { (b, a) } else { (a, b) });
    }
    let order = mirror.flow_order();
    let pos_a = order.iter().position(|id| id == &a.block)?;
    let pos_b = order.iter().position(|id| id == &b.block)?;
    Some(if pos_b < pos_a { (b, a) } else { (a, b) })
}

/// Clamp an address to the node's content: the part index to an existing
/// part, the offset to `[0, run length]` (0 for embeds).
fn clamp_address(node: &crate::model::node::Node, at: ContentAddress) -> ContentAddress {
    if node.content.is_empty() {
        return ContentAddress::start();
    }
    let part = at.part.min(node.content.len() - 1);
    let max = node.content[part]
        .as_run()
        .map(|run| run.len())
        .unwrap_or(0);
    ContentAddress {
        part,
        offset: at.offset.min(max),
    }
}

/// Recompute the focused set: every flow block the range touches.
fn refresh_focused(
    snapshot: &SelectionSnapshot,
    mirror: &Mirror,
    focused: &mut BTreeSet<BlockId>,
) {
    focused.clear();
    if snapshot.start.block == snapshot.end.block {
        focused.insert(snapshot.start.block.clone());
        return;
    }
    let order = mirror.flow_order();
    let mut inside = false;
    for id in order {
        if id == snapshot.start.block {
            inside = true;
        }
        let is_end = id == snapshot.end.block;
        if inside {
            focused.insert(id);
        }
        if is_end {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ View registry tests ============

    #[test]
    fn test_attach_and_detach_round_trip() {
        let mut registry = ViewRegistry::new();
        let block = BlockId::from("b1");
        registry.attach_block_view(ViewId(1), block.clone());
        registry.attach_run_view(ViewId(2), block.clone(), 0);

        assert_eq!(
            registry.target(ViewId(2)),
            Some(&ViewTarget::Run {
                block: block.clone(),
                part: 0
            })
        );
        assert_eq!(registry.views_of(&block).count(), 2);

        registry.detach_view(ViewId(1));
        registry.detach_view(ViewId(2));
        assert_eq!(registry.target(ViewId(1)), None);
        assert_eq!(registry.views_of(&block).count(), 0);
    }

    #[test]
    fn test_unknown_view_resolves_to_none() {
        let registry = ViewRegistry::new();
        assert!(registry.target(ViewId(99)).is_none());
    }
}
