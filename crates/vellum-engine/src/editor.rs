//! The editor facade: one replicated document, its mirror, selection state,
//! plugin hooks, and the transaction pipeline tying them together.
//!
//! Every mutation flows through [`Editor::apply`]: the payload is threaded
//! through the before-hooks (which may replace or veto it), executed against
//! the live containers, committed as one transaction, and announced to the
//! after-hooks. The commit is what updates the mirror — the observer applies
//! the change events synchronously — so the mirror lock is never held across
//! a commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use loro::{ContainerID, EventTriggerKind, Subscription};

use crate::model::mirror::Mirror;
use crate::model::node::{BlockId, ContentAddress};
use crate::model::schema::Schema;
use crate::model::value::{BlockValue, ContentValue};
use crate::ops::{self, Operation, OpCtx};
use crate::plugin::{HookOutcome, PluginRegistry};
use crate::selection::{RawSelection, SelectionModel, SelectionSnapshot, ViewId, ViewRegistry};
use crate::store::{Marks, SeqExt, Store};
use serde_json::Value as Json;

/// Normalized semantic input, as produced by the UI's key/ime handling.
#[derive(Debug, Clone)]
pub enum InputIntent {
    InsertText { text: String },
    DeleteBackward,
    DeleteForward,
    InsertParagraph,
    InsertLineBreak,
    Paste { parts: Vec<ContentValue> },
}

/// Debounce window after which buffered typing flushes on its own.
const TYPING_QUIET: Duration = Duration::from_millis(300);

pub struct Editor {
    store: Store,
    schema: Arc<Schema>,
    mirror: Arc<Mutex<Mirror>>,
    plugins: PluginRegistry,
    selection: SelectionModel,
    views: ViewRegistry,
    staged: HashMap<BlockId, Vec<ContentValue>>,
    pending_marks: Marks,
    typing: TypingBuffer,
    _subscription: Subscription,
}

impl Editor {
    pub fn new(schema: Schema) -> Self {
        let schema = Arc::new(schema);
        let store = Store::new(schema.marks());
        let mirror = Arc::new(Mutex::new(Mirror::new(
            store.root_children(),
            schema.clone(),
        )));

        let observer = mirror.clone();
        let subscription = store.subscribe_root(Arc::new(move |event| {
            let remote = !matches!(event.triggered_by, EventTriggerKind::Local);
            let targets: Vec<ContainerID> =
                event.events.iter().map(|diff| diff.target.clone()).collect();
            let mut mirror = observer.lock().unwrap_or_else(PoisonError::into_inner);
            mirror.apply_change(&targets, remote);
        }));

        Self {
            store,
            schema,
            mirror,
            plugins: PluginRegistry::new(),
            selection: SelectionModel::new(),
            views: ViewRegistry::new(),
            staged: HashMap::new(),
            pending_marks: Marks::new(),
            typing: TypingBuffer::new(TYPING_QUIET),
            _subscription: subscription,
        }
    }

    /// Build an editor pre-populated from a literal document.
    pub fn from_value(schema: Schema, blocks: &[BlockValue]) -> anyhow::Result<Self> {
        let mut editor = Self::new(schema);
        editor.load_value(blocks)?;
        Ok(editor)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============ Transaction pipeline ============

    /// Run one operation end to end: flush buffered typing, consult the
    /// before-hooks, execute, commit, restore the selection, notify the
    /// after-hooks. Returns the block the caret should land on, `None` for a
    /// no-op or a veto.
    pub fn apply(&mut self, op: Operation) -> anyhow::Result<Option<BlockId>> {
        self.flush_typing()?;
        self.apply_inner(op)
    }

    fn apply_inner(&mut self, op: Operation) -> anyhow::Result<Option<BlockId>> {
        let op = match self.plugins.run_before(op) {
            HookOutcome::Proceed(op) => op,
            HookOutcome::Cancel(recovery) => {
                if let Some(recover) = recovery {
                    recover();
                }
                return Ok(None);
            }
        };

        let result = {
            let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ctx = OpCtx {
                store: &self.store,
                mirror: &mirror,
                schema: &self.schema,
                plugins: &self.plugins,
                staged: &mut self.staged,
            };
            ops::execute(&mut ctx, &op)
        };
        // Commit regardless of the outcome so a partial mutation cannot leak
        // into a later, unrelated transaction.
        self.store.commit();
        let result = result?;

        {
            let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            self.selection.restore(&mirror, &self.store);
        }
        self.plugins.run_after(&op, result.as_ref());
        Ok(result)
    }

    // ============ Intent dispatch ============

    /// Dispatch a semantic input intent against the current selection.
    pub fn dispatch(&mut self, intent: InputIntent) -> anyhow::Result<Option<BlockId>> {
        let Some(snapshot) = self.selection.snapshot().cloned() else {
            return Ok(None);
        };
        let spans_blocks = snapshot.start.block != snapshot.end.block;

        match intent {
            InputIntent::InsertText { text } => {
                if snapshot.is_collapsed {
                    return self.insert_typed(
                        snapshot.start.block.clone(),
                        snapshot.start.at,
                        &text,
                    );
                }
                if spans_blocks {
                    return Ok(None);
                }
                let result = self.apply(Operation::InsertText {
                    block: snapshot.start.block.clone(),
                    start: snapshot.start.at,
                    end: snapshot.end.at,
                    text: text.clone(),
                    marks: self.pending_marks.clone(),
                    auto_dot: false,
                })?;
                let caret = ContentAddress {
                    part: snapshot.start.at.part,
                    offset: snapshot.start.at.offset + text.chars().count(),
                };
                self.place_caret(snapshot.start.block.clone(), caret);
                Ok(result)
            }
            InputIntent::DeleteBackward => {
                if !snapshot.is_collapsed {
                    if spans_blocks {
                        return Ok(None);
                    }
                    return self.apply(Operation::DeleteContentAtRange {
                        block: snapshot.start.block.clone(),
                        start: snapshot.start.at,
                        end: snapshot.end.at,
                    });
                }
                if snapshot.is_at_start {
                    let landing = self.merge_landing(&snapshot);
                    let result = self.apply(Operation::MergeBlockBackward {
                        block: snapshot.start.block.clone(),
                    })?;
                    if let (Some(block), Some(at)) = (result.clone(), landing) {
                        self.place_caret(block, at);
                    }
                    return Ok(result);
                }
                let result = self.apply(Operation::DeleteText {
                    block: snapshot.start.block.clone(),
                    at: snapshot.start.at,
                    direction: ops::DeleteDirection::Backward,
                    length: 1,
                })?;
                self.place_caret(
                    snapshot.start.block.clone(),
                    ContentAddress {
                        part: snapshot.start.at.part,
                        offset: snapshot.start.at.offset.saturating_sub(1),
                    },
                );
                Ok(result)
            }
            InputIntent::DeleteForward => {
                if !snapshot.is_collapsed {
                    if spans_blocks {
                        return Ok(None);
                    }
                    return self.apply(Operation::DeleteContentAtRange {
                        block: snapshot.start.block.clone(),
                        start: snapshot.start.at,
                        end: snapshot.end.at,
                    });
                }
                if snapshot.is_at_end {
                    return self.apply(Operation::MergeBlockForward {
                        block: snapshot.start.block.clone(),
                    });
                }
                self.apply(Operation::DeleteText {
                    block: snapshot.start.block.clone(),
                    at: snapshot.start.at,
                    direction: ops::DeleteDirection::Forward,
                    length: 1,
                })
            }
            InputIntent::InsertParagraph => {
                let result = self.apply(Operation::SplitBlock {
                    block: snapshot.start.block.clone(),
                    at: snapshot.start.at,
                })?;
                if let Some(new_block) = &result {
                    self.place_caret(new_block.clone(), ContentAddress::start());
                }
                Ok(result)
            }
            InputIntent::InsertLineBreak => self.dispatch(InputIntent::InsertText {
                text: "\n".to_string(),
            }),
            InputIntent::Paste { parts } => {
                if spans_blocks {
                    return Ok(None);
                }
                // Plain-text pastes land at the caret; anything richer is
                // appended as resolved parts.
                let all_text = parts
                    .iter()
                    .all(|part| matches!(part, ContentValue::Text { .. }));
                if all_text {
                    let text: String = parts
                        .iter()
                        .map(|part| match part {
                            ContentValue::Text { text, .. } => text.as_str(),
                            ContentValue::Block(_) => "",
                        })
                        .collect();
                    return self.dispatch(InputIntent::InsertText { text });
                }
                self.apply(Operation::PushContent {
                    block: snapshot.start.block.clone(),
                    parts,
                })
            }
        }
    }

    /// Where the caret should land after a backward merge: the end of the
    /// closest previous block, captured before the merge mutates anything.
    fn merge_landing(&self, snapshot: &SelectionSnapshot) -> Option<ContentAddress> {
        let mirror = self.mirror();
        let prev = mirror.closest_previous_block(&snapshot.start.block)?;
        Some(mirror.node(prev)?.end_address())
    }

    fn place_caret(&mut self, block: BlockId, at: ContentAddress) {
        let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        self.selection.set_caret(&mirror, &self.store, block, at);
    }

    // ============ Typing buffer ============

    /// Buffer a collapsed-caret insertion. Consecutive insertions continuing
    /// the same run coalesce into one transaction, flushed when the quiet
    /// period elapses, when an unrelated edit arrives, or when the caret
    /// moves somewhere else.
    pub fn insert_typed(
        &mut self,
        block: BlockId,
        at: ContentAddress,
        text: &str,
    ) -> anyhow::Result<Option<BlockId>> {
        let displaced = self.typing.push(block.clone(), at, text);
        if let Some(pending) = displaced {
            self.flush_pending(pending)?;
        }
        Ok(Some(block))
    }

    /// Flush the typing buffer when its quiet period has elapsed. Hosts call
    /// this from their timer; the engine never schedules on its own.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        if let Some(pending) = self.typing.take_if_due() {
            self.flush_pending(pending)?;
        }
        Ok(())
    }

    /// Force the typing buffer out, regardless of the quiet period.
    pub fn flush_typing(&mut self) -> anyhow::Result<()> {
        if let Some(pending) = self.typing.take() {
            self.flush_pending(pending)?;
        }
        Ok(())
    }

    fn flush_pending(&mut self, pending: PendingTyping) -> anyhow::Result<()> {
        self.apply_inner(Operation::InsertText {
            block: pending.block,
            start: pending.start,
            end: pending.start,
            text: pending.text,
            marks: self.pending_marks.clone(),
            auto_dot: false,
        })?;
        Ok(())
    }

    /// Replace the typing clock (hosts and tests drive time explicitly).
    pub fn set_typing_clock(&mut self, clock: impl Fn() -> Instant + 'static) {
        self.typing.clock = Box::new(clock);
    }

    pub fn set_typing_quiet_period(&mut self, quiet: Duration) {
        self.typing.quiet = quiet;
    }

    // ============ Formatting ============

    /// Format the current selection with a mark. A collapsed selection
    /// toggles the pending next-insert marks instead of touching the text; a
    /// selection spanning multiple blocks is a documented no-op.
    pub fn format(
        &mut self,
        mark: &str,
        value: Json,
        toggle: bool,
    ) -> anyhow::Result<Option<BlockId>> {
        if !self.schema.is_registered_mark(mark) {
            anyhow::bail!("mark `{mark}` is not registered in the schema");
        }
        let Some(snapshot) = self.selection.snapshot().cloned() else {
            return Ok(None);
        };
        if snapshot.is_collapsed {
            // Whether the next typed character would come out marked: an
            // explicit staged value wins, otherwise the mark inherited from
            // the character before the caret decides.
            let would_mark = match self.pending_marks.get(mark) {
                Some(staged) => !staged.is_null(),
                None => self.mark_inherited_at_caret(&snapshot, mark),
            };
            if toggle && would_mark {
                // Json::Null stages an explicit unmark, so toggling "off"
                // also suppresses marks that would auto-extend from the
                // preceding text.
                self.pending_marks.insert(mark.to_string(), Json::Null);
            } else {
                self.pending_marks.insert(mark.to_string(), value);
            }
            return Ok(Some(snapshot.start.block.clone()));
        }
        if snapshot.start.block != snapshot.end.block {
            // Multi-block formatting is out of scope.
            return Ok(None);
        }
        self.apply(Operation::MarkText {
            block: snapshot.start.block.clone(),
            start: snapshot.start.at,
            end: snapshot.end.at,
            mark: mark.to_string(),
            value,
            toggle,
        })
    }

    /// Marks the user would see as "active" for the current selection.
    pub fn active_marks(&self) -> Vec<crate::store::Segment> {
        let Some(snapshot) = self.selection.snapshot() else {
            return Vec::new();
        };
        if snapshot.start.block != snapshot.end.block {
            return Vec::new();
        }
        let mirror = self.mirror();
        let mut ctx_staged = HashMap::new();
        let ctx = OpCtx {
            store: &self.store,
            mirror: &mirror,
            schema: &self.schema,
            plugins: &self.plugins,
            staged: &mut ctx_staged,
        };
        ops::marks_at_range(&ctx, &snapshot.start.block, snapshot.start.at, snapshot.end.at)
    }

    /// Whether `mark` sits on the character just before the caret, i.e.
    /// whether it would auto-extend into text typed there.
    fn mark_inherited_at_caret(&self, snapshot: &SelectionSnapshot, mark: &str) -> bool {
        let at = snapshot.start.at;
        if at.offset == 0 {
            return false;
        }
        let before = ContentAddress {
            part: at.part,
            offset: at.offset - 1,
        };
        let mirror = self.mirror();
        let mut ctx_staged = HashMap::new();
        let ctx = OpCtx {
            store: &self.store,
            mirror: &mirror,
            schema: &self.schema,
            plugins: &self.plugins,
            staged: &mut ctx_staged,
        };
        ops::marks_at_range(&ctx, &snapshot.start.block, before, at)
            .iter()
            .any(|segment| segment.marks.contains_key(mark))
    }

    // ============ Selection ============

    /// Feed a raw UI selection event. Returns whether it resolved; an
    /// unresolvable event leaves the previous snapshot in place.
    pub fn update_selection(&mut self, raw: &RawSelection) -> bool {
        self.pending_marks.clear();
        let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        self.selection
            .on_raw_selection(raw, &self.views, &mirror, &self.store)
    }

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    /// Place a collapsed caret programmatically.
    pub fn set_caret(&mut self, block: BlockId, at: ContentAddress) {
        self.place_caret(block, at);
    }

    /// Select-all escalation: text range → whole block → every block.
    pub fn select_all(&mut self) {
        let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
        self.selection.escalate_select_all(&mirror);
    }

    // ============ View attachment ============

    pub fn attach_block_view(&mut self, view: ViewId, block: BlockId) {
        self.views.attach_block_view(view, block);
    }

    pub fn attach_run_view(&mut self, view: ViewId, block: BlockId, part: usize) {
        self.views.attach_run_view(view, block, part);
    }

    pub fn detach_view(&mut self, view: ViewId) {
        self.views.detach_view(view);
    }

    // ============ Document access ============

    /// The whole document as its literal value.
    pub fn value(&self) -> Vec<BlockValue> {
        self.mirror().value()
    }

    /// One block's subtree as its literal value.
    pub fn block_value(&self, block: &BlockId) -> Option<BlockValue> {
        self.mirror().block_value(block)
    }

    pub fn contains(&self, block: &BlockId) -> bool {
        self.mirror().contains(block)
    }

    /// Mirror version counter; bumps once per applied change batch.
    pub fn version(&self) -> u64 {
        self.mirror().version()
    }

    /// Populate an empty editor from literal root blocks, as one transaction.
    pub fn load_value(&mut self, blocks: &[BlockValue]) -> anyhow::Result<()> {
        let result = {
            let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ctx = OpCtx {
                store: &self.store,
                mirror: &mirror,
                schema: &self.schema,
                plugins: &self.plugins,
                staged: &mut self.staged,
            };
            let list = self.store.root_children();
            let mut outcome = Ok(());
            for (index, block) in blocks.iter().enumerate() {
                if let Err(error) = ops::create_from_value(&ctx, &list, index, block) {
                    outcome = Err(error);
                    break;
                }
            }
            if outcome.is_ok() {
                outcome = normalize_roots(&mut ctx, &list);
            }
            outcome
        };
        self.store.commit();
        result
    }

    /// Origin tag this editor stamps on local transactions; an outer undo
    /// stack can group history entries by it.
    pub fn local_origin(&self) -> &'static str {
        crate::store::LOCAL_ORIGIN
    }

    // ============ Synchronization ============

    /// Export the full replicated state for persistence or a joining peer.
    pub fn export_snapshot(&self) -> anyhow::Result<Vec<u8>> {
        self.store.export_snapshot()
    }

    /// Apply a remote peer's update, then re-normalize the document — the
    /// merge of concurrent edits may have produced shapes no local operation
    /// would.
    pub fn import(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.flush_typing()?;
        self.store.import(bytes)?;
        let saw_remote = {
            let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            mirror.take_saw_remote()
        };
        if saw_remote {
            let result = {
                let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
                let mut ctx = OpCtx {
                    store: &self.store,
                    mirror: &mirror,
                    schema: &self.schema,
                    plugins: &self.plugins,
                    staged: &mut self.staged,
                };
                normalize_roots(&mut ctx, &self.store.root_children())
            };
            self.store.commit();
            result?;
        }
        {
            let mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            self.selection.restore(&mirror, &self.store);
        }
        Ok(())
    }
}

/// Normalize every root block map in the live sequence.
fn normalize_roots(ctx: &mut OpCtx<'_>, list: &loro::LoroList) -> anyhow::Result<()> {
    for element in list.elements() {
        if let loro::ValueOrContainer::Container(loro::Container::Map(map)) = element {
            ops::normalize_block(ctx, &map)?;
        }
    }
    Ok(())
}

// ============ Typing buffer internals ============

struct PendingTyping {
    block: BlockId,
    start: ContentAddress,
    text: String,
    deadline: Instant,
}

/// Coalesces rapid same-run character insertions into one transaction.
struct TypingBuffer {
    quiet: Duration,
    clock: Box<dyn Fn() -> Instant>,
    pending: Option<PendingTyping>,
}

impl TypingBuffer {
    fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            clock: Box::new(Instant::now),
            pending: None,
        }
    }

    /// Add typed text. Returns a displaced pending buffer that must be
    /// flushed (typing moved to a different run, or the caret jumped within
    /// the same run).
    fn push(&mut self, block: BlockId, at: ContentAddress, text: &str) -> Option<PendingTyping> {
        let now = (self.clock)();
        if let Some(pending) = &mut self.pending {
            let next = pending.start.offset + pending.text.chars().count();
            if pending.block == block && pending.start.part == at.part && at.offset == next {
                pending.text.push_str(text);
                pending.deadline = now + self.quiet;
                return None;
            }
        }
        let displaced = self.pending.take();
        self.pending = Some(PendingTyping {
            block,
            start: at,
            text: text.to_string(),
            deadline: now + self.quiet,
        });
        displaced
    }

    fn take_if_due(&mut self) -> Option<PendingTyping> {
        let now = (self.clock)();
        if self.pending.as_ref().is_some_and(|p| p.deadline <= now) {
            return self.pending.take();
        }
        None
    }

    fn take(&mut self) -> Option<PendingTyping> {
        self.pending.take()
    }
}
