//! Content normalization.
//!
//! Idempotent repair pass enforcing the content-shape invariants: content is
//! never empty, starts and ends with a text run, holds no two adjacent runs
//! and no two adjacent embeds. Each corrective step re-runs the whole pass
//! from the top instead of fixing everything in one sweep, so the pass is
//! self-healing against whatever partial state another operation left
//! behind. Violations are repaired, never reported.

use loro::{Container, LoroList, LoroMap, LoroText, ValueOrContainer};

use crate::model::node::BlockId;
use crate::ops::{
    append_marked, children_list_of, content_list_of, data_map_of, id_of_map, kind_of_map,
    live_parts, LivePart, OpCtx,
};
use crate::plugin::NormalizeScope;
use crate::store::{text_segments, SeqExt};

/// Ceiling on corrective steps for one block. Reached only by a normalize
/// hook that keeps reporting changes; surfaced as an error instead of
/// spinning.
const MAX_STEPS: usize = 256;

/// Public entry: normalize one block (and its subtree) by id.
pub fn normalize_content(
    ctx: &mut OpCtx<'_>,
    block: &BlockId,
) -> anyhow::Result<Option<BlockId>> {
    let Some(map) = ctx.mirror.node(block).map(|n| n.map.clone()) else {
        return Ok(None);
    };
    normalize_block(ctx, &map)?;
    Ok(Some(block.clone()))
}

/// Normalize a live block map to a fixed point, then recurse into children.
pub fn normalize_block(ctx: &mut OpCtx<'_>, map: &LoroMap) -> anyhow::Result<()> {
    let Some(content) = content_list_of(map) else {
        return Ok(());
    };
    let kind = kind_of_map(map).unwrap_or_default();

    let mut steps = 0;
    while normalize_step(ctx, map, &kind, &content)? {
        steps += 1;
        if steps > MAX_STEPS {
            anyhow::bail!(
                "normalization of `{kind}` did not reach a fixed point after {MAX_STEPS} steps"
            );
        }
    }

    if let Some(children) = children_list_of(map) {
        for element in children.elements() {
            if let ValueOrContainer::Container(Container::Map(child)) = element {
                normalize_block(ctx, &child)?;
            }
        }
    }
    Ok(())
}

/// One corrective step; returns whether anything changed.
fn normalize_step(
    ctx: &mut OpCtx<'_>,
    map: &LoroMap,
    kind: &str,
    content: &LoroList,
) -> anyhow::Result<bool> {
    let parts = live_parts(content);

    // (a) content must start with a text run
    if parts.is_empty() || matches!(parts.first(), Some(LivePart::Embed(_))) {
        content.insert_container(0, LoroText::new())?;
        return Ok(true);
    }
    // (b) and end with one
    if matches!(parts.last(), Some(LivePart::Embed(_))) {
        content.insert_container(parts.len(), LoroText::new())?;
        return Ok(true);
    }
    for index in 0..parts.len() - 1 {
        match (&parts[index], &parts[index + 1]) {
            // (c) adjacent runs merge (mark distinctions live inside the run)
            (LivePart::Run(first), LivePart::Run(second)) => {
                for segment in text_segments(second) {
                    append_marked(ctx, first, &segment.text, &segment.marks)?;
                }
                content.delete(index + 1, 1)?;
                return Ok(true);
            }
            // (d) adjacent embeds get an empty separator run
            (LivePart::Embed(_), LivePart::Embed(_)) => {
                content.insert_container(index + 1, LoroText::new())?;
                return Ok(true);
            }
            _ => {}
        }
    }

    // (e) kind-specific hook
    let scope = NormalizeScope {
        block: id_of_map(map),
        kind,
        content,
        data: data_map_of(map),
    };
    for hook in ctx.plugins.normalizers(kind) {
        if hook(&scope)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mirror::Mirror;
    use crate::model::schema::{BlockDefinition, Schema};
    use crate::model::value::{BlockValue, ContentValue};
    use crate::ops::{create_from_value, OpCtx};
    use crate::plugin::PluginRegistry;
    use crate::store::Store;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .block(BlockDefinition::flow("paragraph"))
                .block(BlockDefinition::inline("mention"))
                .mark("bold")
                .build()
                .unwrap(),
        )
    }

    fn harness() -> (Store, Arc<Schema>, PluginRegistry) {
        let schema = schema();
        (Store::new(schema.marks()), schema, PluginRegistry::new())
    }

    // ============ Shape repair tests ============

    #[test]
    fn test_embed_first_gets_leading_run() {
        let (store, schema, plugins) = harness();
        let mirror = Mirror::new(store.root_children(), schema.clone());
        let mut staged = HashMap::new();
        let mut ctx = OpCtx {
            store: &store,
            mirror: &mirror,
            schema: &schema,
            plugins: &plugins,
            staged: &mut staged,
        };

        let value = BlockValue::new("paragraph").with_content(vec![
            ContentValue::Block(BlockValue::new("mention")),
            ContentValue::plain("after"),
        ]);
        let list = store.root_children();
        let id = create_from_value(&ctx, &list, 0, &value).unwrap();
        let map = crate::ops::structural::find_map_by_id(&list, &id).unwrap();
        normalize_block(&mut ctx, &map).unwrap();
        store.commit();

        let parts = live_parts(&content_list_of(&map).unwrap());
        assert!(matches!(parts.first(), Some(LivePart::Run(_))));
        assert!(matches!(parts.last(), Some(LivePart::Run(_))));
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_adjacent_embeds_get_separator() {
        let (store, schema, plugins) = harness();
        let mirror = Mirror::new(store.root_children(), schema.clone());
        let mut staged = HashMap::new();
        let mut ctx = OpCtx {
            store: &store,
            mirror: &mirror,
            schema: &schema,
            plugins: &plugins,
            staged: &mut staged,
        };

        let value = BlockValue::new("paragraph").with_content(vec![
            ContentValue::plain("a"),
            ContentValue::Block(BlockValue::new("mention")),
            ContentValue::Block(BlockValue::new("mention")),
            ContentValue::plain("b"),
        ]);
        let list = store.root_children();
        let id = create_from_value(&ctx, &list, 0, &value).unwrap();
        let map = crate::ops::structural::find_map_by_id(&list, &id).unwrap();
        normalize_block(&mut ctx, &map).unwrap();
        store.commit();

        let parts = live_parts(&content_list_of(&map).unwrap());
        // run, embed, run, embed, run
        assert_eq!(parts.len(), 5);
        assert!(matches!(parts[2], LivePart::Run(_)));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let (store, schema, plugins) = harness();
        let mirror = Mirror::new(store.root_children(), schema.clone());
        let mut staged = HashMap::new();
        let mut ctx = OpCtx {
            store: &store,
            mirror: &mirror,
            schema: &schema,
            plugins: &plugins,
            staged: &mut staged,
        };

        let value = BlockValue::new("paragraph").with_content(vec![
            ContentValue::Block(BlockValue::new("mention")),
            ContentValue::Block(BlockValue::new("mention")),
        ]);
        let list = store.root_children();
        let id = create_from_value(&ctx, &list, 0, &value).unwrap();
        let map = crate::ops::structural::find_map_by_id(&list, &id).unwrap();

        normalize_block(&mut ctx, &map).unwrap();
        let first_pass: Vec<bool> = live_parts(&content_list_of(&map).unwrap())
            .iter()
            .map(|p| matches!(p, LivePart::Run(_)))
            .collect();
        normalize_block(&mut ctx, &map).unwrap();
        let second_pass: Vec<bool> = live_parts(&content_list_of(&map).unwrap())
            .iter()
            .map(|p| matches!(p, LivePart::Run(_)))
            .collect();
        assert_eq!(first_pass, second_pass);
    }
}
