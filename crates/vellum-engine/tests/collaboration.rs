//! Two-peer synchronization scenarios: snapshot exchange, concurrent-edit
//! convergence, and caret continuity across remote edits.

use pretty_assertions::assert_eq;
use serde_json::json;
use vellum_engine::{
    BlockDefinition, BlockId, BlockValue, ContentAddress, ContentValue, Editor, Marks, Operation,
    Schema,
};

fn schema() -> Schema {
    Schema::builder()
        .block(BlockDefinition::flow("paragraph"))
        .block(BlockDefinition::inline("mention"))
        .mark("bold")
        .build()
        .unwrap()
}

fn root_id(editor: &Editor, index: usize) -> BlockId {
    let value = &editor.value()[index];
    BlockId::from(value.id.as_deref().expect("blocks carry ids"))
}

fn paragraph(text: &str) -> BlockValue {
    BlockValue::with_text("paragraph", text)
}

/// Spin up a second peer from the first peer's snapshot.
fn join(origin: &Editor) -> Editor {
    let mut peer = Editor::new(schema());
    peer.import(&origin.export_snapshot().unwrap()).unwrap();
    peer
}

// ============ Snapshot exchange ============

#[test]
fn test_joining_peer_sees_the_full_document() {
    let alice = Editor::from_value(
        schema(),
        &[
            paragraph("Intro").with_children(vec![paragraph("Detail")]),
            BlockValue::new("paragraph").with_content(vec![
                ContentValue::plain("Ping "),
                ContentValue::Block(BlockValue::new("mention").with_data("user", json!("bob"))),
                ContentValue::plain(""),
            ]),
        ],
    )
    .unwrap();

    let bob = join(&alice);
    assert_eq!(bob.value(), alice.value());
}

#[test]
fn test_remote_edit_arrives_through_import() {
    let mut alice = Editor::from_value(schema(), &[paragraph("Hello")]).unwrap();
    let mut bob = join(&alice);
    let block = root_id(&alice, 0);

    alice
        .apply(Operation::InsertText {
            block,
            start: ContentAddress { part: 0, offset: 5 },
            end: ContentAddress { part: 0, offset: 5 },
            text: ", world".to_string(),
            marks: Marks::new(),
            auto_dot: false,
        })
        .unwrap();

    let before = bob.version();
    bob.import(&alice.export_snapshot().unwrap()).unwrap();
    assert_eq!(bob.value()[0].plain_text(), "Hello, world");
    assert!(bob.version() > before);
}

// ============ Concurrent-edit convergence ============

#[test]
fn test_concurrent_text_edits_in_one_run_converge() {
    let mut alice = Editor::from_value(schema(), &[paragraph("Hello")]).unwrap();
    let mut bob = join(&alice);
    let block = root_id(&alice, 0);

    // Alice prepends, Bob appends — offline, then both import the other.
    alice
        .apply(Operation::InsertText {
            block: block.clone(),
            start: ContentAddress::start(),
            end: ContentAddress::start(),
            text: ">> ".to_string(),
            marks: Marks::new(),
            auto_dot: false,
        })
        .unwrap();
    bob.apply(Operation::InsertText {
            block,
            start: ContentAddress { part: 0, offset: 5 },
            end: ContentAddress { part: 0, offset: 5 },
            text: "!".to_string(),
            marks: Marks::new(),
            auto_dot: false,
        })
        .unwrap();

    let from_alice = alice.export_snapshot().unwrap();
    let from_bob = bob.export_snapshot().unwrap();
    alice.import(&from_bob).unwrap();
    bob.import(&from_alice).unwrap();

    assert_eq!(alice.value(), bob.value());
    assert_eq!(alice.value()[0].plain_text(), ">> Hello!");
}

#[test]
fn test_concurrent_edits_to_different_blocks_both_survive() {
    let mut alice =
        Editor::from_value(schema(), &[paragraph("One"), paragraph("Two")]).unwrap();
    let mut bob = join(&alice);
    let first = root_id(&alice, 0);
    let second = root_id(&alice, 1);

    alice
        .apply(Operation::PushContent {
            block: first,
            parts: vec![ContentValue::plain(" (a)")],
        })
        .unwrap();
    bob.apply(Operation::PushContent {
            block: second,
            parts: vec![ContentValue::plain(" (b)")],
        })
        .unwrap();

    let from_alice = alice.export_snapshot().unwrap();
    let from_bob = bob.export_snapshot().unwrap();
    alice.import(&from_bob).unwrap();
    bob.import(&from_alice).unwrap();

    assert_eq!(alice.value(), bob.value());
    let texts: Vec<String> = alice.value().iter().map(BlockValue::plain_text).collect();
    assert_eq!(texts, ["One (a)", "Two (b)"]);
}

#[test]
fn test_concurrent_split_and_append_normalize_after_merge() {
    let mut alice = Editor::from_value(schema(), &[paragraph("Hello world")]).unwrap();
    let mut bob = join(&alice);
    let block = root_id(&alice, 0);

    alice
        .apply(Operation::SplitBlock {
            block: block.clone(),
            at: ContentAddress { part: 0, offset: 5 },
        })
        .unwrap();
    bob.apply(Operation::PushContent {
            block,
            parts: vec![ContentValue::plain("!")],
        })
        .unwrap();

    let from_alice = alice.export_snapshot().unwrap();
    let from_bob = bob.export_snapshot().unwrap();
    alice.import(&from_bob).unwrap();
    bob.import(&from_alice).unwrap();

    // Both peers converge on the same repaired shape: every block's content
    // still starts and ends with a run and holds no adjacent runs.
    assert_eq!(alice.value(), bob.value());
    for value in alice.value() {
        assert!(!value.content.is_empty());
        let mut prev_was_text = false;
        for part in &value.content {
            let is_text = matches!(part, ContentValue::Text { .. });
            assert!(!(prev_was_text && is_text), "adjacent runs survived the merge");
            prev_was_text = is_text;
        }
    }
}

// ============ Caret continuity ============

#[test]
fn test_caret_survives_a_remote_insertion_before_it() {
    let mut alice = Editor::from_value(schema(), &[paragraph("Hello world")]).unwrap();
    let mut bob = join(&alice);
    let block = root_id(&alice, 0);

    // Bob parks his caret between "Hello" and " world".
    bob.set_caret(block.clone(), ContentAddress { part: 0, offset: 5 });

    alice
        .apply(Operation::InsertText {
            block,
            start: ContentAddress::start(),
            end: ContentAddress::start(),
            text: ">> ".to_string(),
            marks: Marks::new(),
            auto_dot: false,
        })
        .unwrap();
    bob.import(&alice.export_snapshot().unwrap()).unwrap();

    assert_eq!(bob.value()[0].plain_text(), ">> Hello world");
    let snapshot = bob.selection().snapshot().expect("caret restored");
    assert_eq!(snapshot.start.at.offset, 8);
}

#[test]
fn test_caret_in_a_remotely_removed_block_is_dropped() {
    let mut alice = Editor::from_value(schema(), &[paragraph("Keep"), paragraph("Drop")]).unwrap();
    let mut bob = join(&alice);
    let doomed = root_id(&alice, 1);

    bob.set_caret(doomed.clone(), ContentAddress { part: 0, offset: 2 });
    alice
        .apply(Operation::RemoveBlock {
            block: doomed,
            keep_children: false,
        })
        .unwrap();
    bob.import(&alice.export_snapshot().unwrap()).unwrap();

    assert_eq!(bob.value().len(), 1);
    assert!(bob.selection().snapshot().is_none());
}

// ============ Origin tagging ============

#[test]
fn test_local_origin_is_stable_for_history_grouping() {
    let editor = Editor::new(schema());
    assert_eq!(editor.local_origin(), "vellum:local");
}
