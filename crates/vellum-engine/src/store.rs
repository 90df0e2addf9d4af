//! Shared-tree primitives adapter over Loro.
//!
//! The engine never talks to the CRDT library outside this module. Each block
//! is a `LoroMap` holding scalar fields plus nested `LoroList` containers for
//! `content` and `children`; text runs are `LoroText` with Peritext marks.
//! Mutations between two commits form one atomic, observably-batched
//! transaction — the engine's undo/redo unit — and local commits carry an
//! origin tag so observers can tell them apart from imported remote updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use loro::cursor::{Cursor, Side};
use loro::event::DiffEvent;
use loro::{
    Container, ContainerID, ContainerTrait, ExpandType, ExportMode, LoroDoc, LoroList, LoroMap,
    LoroText, LoroValue, StyleConfig, StyleConfigMap, Subscription, ValueOrContainer,
};
use serde_json::Value as Json;

/// Origin tag stamped on every locally-initiated commit.
pub const LOCAL_ORIGIN: &str = "vellum:local";

/// Key of the top-level sequence holding the document's root blocks.
const ROOT_CHILDREN: &str = "children";
const META: &str = "_meta";
const SCHEMA_VERSION: &str = "_schema_version";

// Field names of a replicated block map (our "schema").
pub const FIELD_ID: &str = "id";
pub const FIELD_KIND: &str = "kind";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_CHILDREN: &str = "children";
pub const FIELD_DATA: &str = "data";

/// Errors raised when the replicated data does not have the expected shape.
///
/// These indicate a corrupted or incompatible document, not a user mistake;
/// operations surface them through `anyhow` rather than recovering.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("replicated field `{0}` is missing or has the wrong container type")]
    FieldShape(&'static str),
}

/// Wrapper around the replicated document.
///
/// Commit discipline: callers batch mutations and finish with [`Store::commit`]
/// (or let [`crate::Editor::apply`] do it). Nothing here commits implicitly.
pub struct Store {
    doc: LoroDoc,
}

impl Store {
    /// Create an empty replicated document, registering mark styles so that
    /// Peritext formatting behaves consistently across peers.
    ///
    /// `marks` lists every mark name the document may use. Inserting at a mark
    /// boundary extends the mark (typing after bold text stays bold), except
    /// for `link`, which never auto-extends.
    pub fn new(marks: &[String]) -> Self {
        let doc = LoroDoc::new();

        let mut styles = StyleConfigMap::new();
        for mark in marks {
            let expand = if mark == "link" {
                ExpandType::None
            } else {
                ExpandType::After
            };
            styles.insert(mark.as_str().into(), StyleConfig { expand });
        }
        doc.config_text_style(styles);

        // Pin the data-model version for future migrations.
        let meta = doc.get_map(META);
        let _ = meta.insert(SCHEMA_VERSION, LoroValue::from(1i64));
        doc.commit();

        Self { doc }
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    /// The top-level sequence of root block maps.
    pub fn root_children(&self) -> LoroList {
        self.doc.get_list(ROOT_CHILDREN)
    }

    /// Commit the pending mutations as one locally-originated transaction.
    pub fn commit(&self) {
        self.doc
            .commit_with(loro::CommitOptions::new().origin(LOCAL_ORIGIN));
    }

    /// Subscribe to every mutation of the document, local or remote.
    /// Dropping the returned subscription detaches the observer.
    pub fn subscribe_root(
        &self,
        callback: Arc<dyn for<'a> Fn(DiffEvent<'a>) + Send + Sync>,
    ) -> Subscription {
        self.doc.subscribe_root(callback)
    }

    /// Export the full replicated state (for persistence handoff or a new peer).
    pub fn export_snapshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.doc.export(ExportMode::Snapshot)?)
    }

    /// Apply an update produced by another peer. The resulting change events
    /// carry a remote trigger kind, so observers can normalize afterwards.
    pub fn import(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let _status = self.doc.import(bytes)?;
        Ok(())
    }

    /// Capture a durable token for `offset` in `text` that survives concurrent
    /// edits; resolve it back with [`Store::resolve_caret`].
    pub fn caret_token(&self, text: &LoroText, offset: usize) -> Option<Cursor> {
        text.get_cursor(offset, Side::Left)
    }

    /// Re-resolve a previously captured caret token to a current offset.
    /// Returns `None` when the position no longer exists (e.g. its run was
    /// deleted by a concurrent edit).
    pub fn resolve_caret(&self, token: &Cursor) -> Option<usize> {
        self.doc.get_cursor_pos(token).ok().map(|q| q.current.pos)
    }
}

// ============ JSON <-> replicated value conversion ============

/// Convert a JSON literal into a replicated scalar value.
pub fn json_to_loro(value: &Json) -> LoroValue {
    serde_json::from_value(value.clone()).unwrap_or(LoroValue::Null)
}

/// Convert a replicated scalar value back into a JSON literal.
pub fn loro_to_json(value: &LoroValue) -> Json {
    serde_json::to_value(value).unwrap_or(Json::Null)
}

// ============ Container extension traits ============

/// Typed accessors for the fields of a replicated block map.
pub trait MapExt {
    fn get_str(&self, key: &str) -> Option<String>;
    fn get_list_field(&self, key: &'static str) -> Result<LoroList, StoreError>;
    fn get_map_field(&self, key: &'static str) -> Result<LoroMap, StoreError>;
    /// Snapshot the map's scalar entries as JSON (containers are skipped).
    fn scalar_entries(&self) -> BTreeMap<String, Json>;
}

impl MapExt for LoroMap {
    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(ValueOrContainer::Value(v)) => v.as_string().map(|s| s.to_string()),
            _ => None,
        }
    }

    fn get_list_field(&self, key: &'static str) -> Result<LoroList, StoreError> {
        match self.get(key) {
            Some(ValueOrContainer::Container(Container::List(list))) => Ok(list),
            _ => Err(StoreError::FieldShape(key)),
        }
    }

    fn get_map_field(&self, key: &'static str) -> Result<LoroMap, StoreError> {
        match self.get(key) {
            Some(ValueOrContainer::Container(Container::Map(map))) => Ok(map),
            _ => Err(StoreError::FieldShape(key)),
        }
    }

    fn scalar_entries(&self) -> BTreeMap<String, Json> {
        let mut out = BTreeMap::new();
        self.for_each(|key, value| {
            if let ValueOrContainer::Value(v) = value {
                out.insert(key.to_string(), loro_to_json(&v));
            }
        });
        out
    }
}

/// Helpers for the block/content sequences.
pub trait SeqExt {
    /// All elements, in order.
    fn elements(&self) -> Vec<ValueOrContainer>;
    /// Current index of the nested container with the given id.
    /// Re-resolves on every call: cached indices are not trustworthy across
    /// multiple structural mutations inside one transaction.
    fn index_of_container(&self, id: &ContainerID) -> Option<usize>;
}

impl SeqExt for LoroList {
    fn elements(&self) -> Vec<ValueOrContainer> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|v| out.push(v));
        out
    }

    fn index_of_container(&self, id: &ContainerID) -> Option<usize> {
        let mut index = 0;
        let mut found = None;
        self.for_each(|v| {
            if found.is_none() {
                if let ValueOrContainer::Container(c) = &v {
                    if &c.id() == id {
                        found = Some(index);
                    }
                }
            }
            index += 1;
        });
        found
    }
}

// ============ Attributed-text decomposition ============

/// Mark set of one text span. `BTreeMap` so two mark sets compare equal
/// independent of insertion order.
pub type Marks = BTreeMap<String, Json>;

/// One uniformly-marked span of an attributed text run.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub marks: Marks,
}

impl Segment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Marks::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Decompose an attributed text run into `{text, marks}` segments.
///
/// Always derived fresh from the handle — the decomposition is never
/// hand-maintained, so it cannot drift from the replicated state.
pub fn text_segments(text: &LoroText) -> Vec<Segment> {
    let LoroValue::List(items) = text.get_richtext_value() else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    for item in items.iter() {
        let Some(entry) = item.as_map() else { continue };
        let Some(insert) = entry.get("insert").and_then(|v| v.as_string()) else {
            continue;
        };
        let marks = entry
            .get("attributes")
            .and_then(|v| v.as_map())
            .map(|attrs| {
                attrs
                    .iter()
                    .filter(|(_, v)| !matches!(v, LoroValue::Null))
                    .map(|(k, v)| (k.to_string(), loro_to_json(v)))
                    .collect()
            })
            .unwrap_or_default();
        segments.push(Segment {
            text: insert.to_string(),
            marks,
        });
    }
    segments
}

/// Apply a mark over `[start, end)` of a run. A `Json::Null` value clears the
/// mark instead of setting it.
pub fn apply_mark(
    text: &LoroText,
    start: usize,
    end: usize,
    mark: &str,
    value: &Json,
) -> anyhow::Result<()> {
    if start >= end {
        return Ok(());
    }
    if value.is_null() {
        text.unmark(start..end, mark)?;
    } else {
        text.mark(start..end, mark, json_to_loro(value))?;
    }
    Ok(())
}

/// Hydrate the owned limbs of a fresh block map: empty `content` and
/// `children` sequences plus the opaque `data` map.
pub fn init_block_fields(map: &LoroMap, id: &str, kind: &str) -> anyhow::Result<(LoroList, LoroList, LoroMap)> {
    map.insert(FIELD_ID, LoroValue::from(id))?;
    map.insert(FIELD_KIND, LoroValue::from(kind))?;
    let content = map.insert_container(FIELD_CONTENT, LoroList::new())?;
    let children = map.insert_container(FIELD_CHILDREN, LoroList::new())?;
    let data = map.insert_container(FIELD_DATA, LoroMap::new())?;
    Ok((content, children, data))
}
