//! Replicated-state mirror.
//!
//! The mirror is the read side of the engine: a flat, id-keyed table of
//! [`Node`]s rebuilt incrementally from change events. It has exactly one
//! writer — the change observer — so every mutation path, local or remote,
//! updates reads through the same code. Operations never patch the mirror
//! directly; they mutate the replicated containers and let the event bring
//! the mirror up to date.
//!
//! Change events only tell us *which* containers changed. Rather than replay
//! per-item deltas, the mirror re-reads the affected container (and, for
//! structural lists, the subtree below it) from the live document, then runs
//! a restamp pass that re-derives parent, index and depth for every reachable
//! block and drops entries no longer reachable from the roots.

use std::collections::{HashMap, HashSet};

use loro::{Container, ContainerID, ContainerTrait, LoroList, LoroMap, ValueOrContainer};
use std::sync::Arc;

use crate::model::node::{BlockId, BlockPath, ContentPart, Node, TextRun};
use crate::model::schema::{BlockRole, Schema};
use crate::model::value::{coalesce, BlockValue, ContentValue};
use crate::store::{text_segments, MapExt, SeqExt, FIELD_CHILDREN, FIELD_CONTENT, FIELD_DATA, FIELD_ID, FIELD_KIND};

/// What a changed container means for the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    RootChildren,
    Children(BlockId),
    Content(BlockId),
    /// Block map or its data map.
    Block(BlockId),
    /// Text run owned by a block's content.
    Text(BlockId),
}

pub struct Mirror {
    schema: Arc<Schema>,
    root_list: LoroList,
    nodes: HashMap<BlockId, Node>,
    routes: HashMap<ContainerID, Route>,
    roots: Vec<BlockId>,
    /// Bumped once per applied change batch; views use it as a cheap
    /// "did anything change" check.
    version: u64,
    /// Set when the last applied batch was not locally originated.
    saw_remote: bool,
}

impl Mirror {
    pub fn new(root_list: LoroList, schema: Arc<Schema>) -> Self {
        let mut mirror = Self {
            schema,
            root_list,
            nodes: HashMap::new(),
            routes: HashMap::new(),
            roots: Vec::new(),
            version: 0,
            saw_remote: false,
        };
        mirror.full_rebuild();
        mirror
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consume the remote-change flag set by the observer.
    pub fn take_saw_remote(&mut self) -> bool {
        std::mem::take(&mut self.saw_remote)
    }

    pub fn roots(&self) -> &[BlockId] {
        &self.roots
    }

    pub fn node(&self, id: &BlockId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ============ Event application ============

    /// Apply one change batch: refresh the mirror state behind each changed
    /// container, then restamp. `targets` are the containers the batch
    /// touched; `remote` is whether the batch came from an import/checkout.
    pub fn apply_change(&mut self, targets: &[ContainerID], remote: bool) {
        let mut unrouted = false;
        for target in targets {
            match self.routes.get(target).cloned() {
                Some(Route::RootChildren) => {
                    let list = self.root_list.clone();
                    self.roots = self.hydrate_block_list(&list);
                }
                Some(Route::Children(id)) => {
                    if let Some(list) = self.nodes.get(&id).map(|n| n.children_list.clone()) {
                        let children = self.hydrate_block_list(&list);
                        if let Some(node) = self.nodes.get_mut(&id) {
                            node.children = children;
                        }
                    }
                }
                Some(Route::Content(id)) | Some(Route::Text(id)) => {
                    self.refresh_content(&id);
                }
                Some(Route::Block(id)) => {
                    if let Some(map) = self.nodes.get(&id).map(|n| n.map.clone()) {
                        self.hydrate_block(&map);
                    }
                }
                // A container we have never routed: its parent structure
                // changed in ways we cannot localize, so re-read everything.
                None => unrouted = true,
            }
        }
        if unrouted {
            self.full_rebuild();
        } else {
            self.restamp();
        }
        self.version += 1;
        if remote {
            self.saw_remote = true;
        }
    }

    /// Re-read the whole document from the live containers.
    pub fn full_rebuild(&mut self) {
        self.nodes.clear();
        self.routes.clear();
        self.routes
            .insert(self.root_list.id(), Route::RootChildren);
        let list = self.root_list.clone();
        self.roots = self.hydrate_block_list(&list);
        self.restamp();
        self.version += 1;
    }

    /// Hydrate every block map in `list`, in order; malformed elements are
    /// skipped.
    fn hydrate_block_list(&mut self, list: &LoroList) -> Vec<BlockId> {
        let mut ids = Vec::new();
        for element in list.elements() {
            if let ValueOrContainer::Container(Container::Map(map)) = element {
                if let Some(id) = self.hydrate_block(&map) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// (Re)build the mirror entry for one block map, recursing into its
    /// content and children. Re-hydrating an id that already exists refreshes
    /// the existing entry, so a block moved within one batch lands once.
    fn hydrate_block(&mut self, map: &LoroMap) -> Option<BlockId> {
        let id = BlockId::from_string(map.get_str(FIELD_ID)?);
        let kind = map.get_str(FIELD_KIND)?;
        // Unknown kinds are fatal: the document came from an incompatible schema.
        self.schema.expect_definition(&kind);

        let content_list = map.get_list_field(FIELD_CONTENT).ok()?;
        let children_list = map.get_list_field(FIELD_CHILDREN).ok()?;
        let data_map = map.get_map_field(FIELD_DATA).ok()?;

        self.routes.insert(map.id(), Route::Block(id.clone()));
        self.routes.insert(data_map.id(), Route::Block(id.clone()));
        self.routes
            .insert(content_list.id(), Route::Content(id.clone()));
        self.routes
            .insert(children_list.id(), Route::Children(id.clone()));

        let content = self.hydrate_content(&id, &content_list);
        let children = self.hydrate_block_list(&children_list);
        let data = data_map.scalar_entries();

        let (parent, index, depth) = self
            .nodes
            .get(&id)
            .map(|n| (n.parent.clone(), n.index, n.depth))
            .unwrap_or((None, 0, 0));

        self.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                kind,
                map: map.clone(),
                content_list,
                children_list,
                data_map,
                content,
                children,
                data,
                parent,
                index,
                depth,
            },
        );
        Some(id)
    }

    fn hydrate_content(&mut self, owner: &BlockId, list: &LoroList) -> Vec<ContentPart> {
        let mut parts = Vec::new();
        for element in list.elements() {
            match element {
                ValueOrContainer::Container(Container::Text(text)) => {
                    self.routes.insert(text.id(), Route::Text(owner.clone()));
                    parts.push(ContentPart::Run(TextRun {
                        text: text.to_string(),
                        segments: text_segments(&text),
                        handle: text,
                    }));
                }
                ValueOrContainer::Container(Container::Map(map)) => {
                    if let Some(id) = self.hydrate_block(&map) {
                        parts.push(ContentPart::Embed(id));
                    }
                }
                _ => {}
            }
        }
        parts
    }

    fn refresh_content(&mut self, id: &BlockId) {
        if let Some(list) = self.nodes.get(id).map(|n| n.content_list.clone()) {
            let content = self.hydrate_content(id, &list);
            if let Some(node) = self.nodes.get_mut(id) {
                node.content = content;
            }
        }
    }

    // ============ Restamp ============

    /// Re-derive parent/index/depth for every block reachable from the roots
    /// and purge entries (and their routes) that no longer are.
    fn restamp(&mut self) {
        let mut reachable = HashSet::new();
        let roots = self.roots.clone();
        for (index, id) in roots.iter().enumerate() {
            self.stamp(id, None, index, 0, &mut reachable);
        }
        self.nodes.retain(|id, _| reachable.contains(id));
        let nodes = &self.nodes;
        self.routes.retain(|_, route| match route {
            Route::RootChildren => true,
            Route::Children(id)
            | Route::Content(id)
            | Route::Block(id)
            | Route::Text(id) => nodes.contains_key(id),
        });
    }

    fn stamp(
        &mut self,
        id: &BlockId,
        parent: Option<&BlockId>,
        index: usize,
        depth: usize,
        reachable: &mut HashSet<BlockId>,
    ) {
        if !reachable.insert(id.clone()) {
            return;
        }
        let (content, children) = match self.nodes.get_mut(id) {
            Some(node) => {
                node.parent = parent.cloned();
                node.index = index;
                node.depth = depth;
                (node.content.clone(), node.children.clone())
            }
            None => return,
        };
        for (part_index, part) in content.iter().enumerate() {
            if let ContentPart::Embed(embed) = part {
                self.stamp(embed, Some(id), part_index, depth + 1, reachable);
            }
        }
        for (child_index, child) in children.iter().enumerate() {
            self.stamp(child, Some(id), child_index, depth + 1, reachable);
        }
    }

    // ============ Navigation ============

    /// Child-index path of a flow block from the document root.
    pub fn path_of(&self, id: &BlockId) -> Option<BlockPath> {
        let mut path = Vec::new();
        let mut current = self.node(id)?;
        loop {
            path.push(current.index);
            match &current.parent {
                Some(parent) => current = self.node(parent)?,
                None => break,
            }
        }
        path.reverse();
        Some(path)
    }

    pub fn node_at_path(&self, path: &[usize]) -> Option<&Node> {
        let (&first, rest) = path.split_first()?;
        let mut node = self.node(self.roots.get(first)?)?;
        for &index in rest {
            node = self.node(node.children.get(index)?)?;
        }
        Some(node)
    }

    /// Sibling sequence the block lives in (parent's children, or the roots).
    fn siblings(&self, id: &BlockId) -> Option<&[BlockId]> {
        let node = self.node(id)?;
        match &node.parent {
            Some(parent) => Some(&self.node(parent)?.children),
            None => Some(&self.roots),
        }
    }

    pub fn previous_sibling(&self, id: &BlockId) -> Option<&BlockId> {
        let index = self.node(id)?.index;
        self.siblings(id)?.get(index.checked_sub(1)?)
    }

    pub fn next_sibling(&self, id: &BlockId) -> Option<&BlockId> {
        let index = self.node(id)?.index;
        self.siblings(id)?.get(index + 1)
    }

    /// Last block of the subtree rooted at `id`, in visual order (the block
    /// itself when it has no children).
    pub fn deepest_last_descendant<'a>(&'a self, id: &'a BlockId) -> &'a BlockId {
        let mut current = id;
        while let Some(last) = self.node(current).and_then(|n| n.children.last()) {
            current = last;
        }
        current
    }

    /// The block a caret lands on when leaving the start of `id` backwards:
    /// the previous sibling's deepest last descendant, else the parent.
    pub fn closest_previous_block(&self, id: &BlockId) -> Option<&BlockId> {
        match self.previous_sibling(id) {
            Some(prev) => Some(self.deepest_last_descendant(prev)),
            None => self.node(id)?.parent.as_ref().and_then(|p| self.node(p)).map(|n| &n.id),
        }
    }

    /// The block after `id` in visual order: its first child, else the next
    /// sibling of the nearest ancestor that has one.
    pub fn closest_next_block(&self, id: &BlockId) -> Option<&BlockId> {
        if let Some(first) = self.node(id).and_then(|n| n.children.first()) {
            return Some(first);
        }
        let mut current = id;
        loop {
            if let Some(next) = self.next_sibling(current) {
                return Some(next);
            }
            current = self.node(current)?.parent.as_ref()?;
        }
    }

    /// Every flow block in visual (depth-first) order.
    pub fn flow_order(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&BlockId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                if self.schema.expect_definition(&node.kind).role == BlockRole::Flow {
                    out.push(id.clone());
                }
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Whether `ancestor` is `id` or a transitive parent of it.
    pub fn is_ancestor_or_self(&self, ancestor: &BlockId, id: &BlockId) -> bool {
        let mut current = Some(id.clone());
        while let Some(c) = current {
            if &c == ancestor {
                return true;
            }
            current = self.node(&c).and_then(|n| n.parent.clone());
        }
        false
    }

    // ============ Literal projection ============

    /// Project the whole document to its literal value.
    pub fn value(&self) -> Vec<BlockValue> {
        self.roots
            .iter()
            .filter_map(|id| self.block_value(id))
            .collect()
    }

    /// Project one block (and its subtree) to its literal value.
    pub fn block_value(&self, id: &BlockId) -> Option<BlockValue> {
        let node = self.node(id)?;
        let mut content = Vec::new();
        for part in &node.content {
            match part {
                ContentPart::Run(run) => {
                    for segment in &run.segments {
                        content.push(ContentValue::Text {
                            text: segment.text.clone(),
                            marks: segment.marks.clone(),
                        });
                    }
                    if run.segments.is_empty() {
                        content.push(ContentValue::plain(""));
                    }
                }
                ContentPart::Embed(embed) => {
                    if let Some(value) = self.block_value(embed) {
                        content.push(ContentValue::Block(value));
                    }
                }
            }
        }
        Some(BlockValue {
            id: Some(node.id.to_string()),
            kind: node.kind.clone(),
            content: coalesce(content),
            children: node
                .children
                .iter()
                .filter_map(|child| self.block_value(child))
                .collect(),
            data: node.data.clone(),
        })
    }
}
