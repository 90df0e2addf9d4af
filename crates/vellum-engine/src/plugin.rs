//! Plugin hook registry.
//!
//! Plugins observe and steer operations through three hook points: before
//! execution (replace the payload or veto), after execution (observe only),
//! and a per-kind extension consulted by the normalization pass. A veto is
//! an explicit return value checked by the transaction wrapper — cancelling
//! skips the whole mutation, and the optional recovery callback runs in its
//! place.

use std::collections::HashMap;
use std::sync::Arc;

use loro::{LoroList, LoroMap};

use crate::model::node::BlockId;
use crate::ops::Operation;

/// What a before-hook decided about an in-flight operation.
pub enum HookOutcome {
    /// Run this (possibly replaced) payload.
    Proceed(Operation),
    /// Skip the mutation entirely; run the recovery callback instead, when
    /// one is supplied.
    Cancel(Option<Recovery>),
}

/// Fallback the editor runs when a hook cancels an operation.
pub type Recovery = Box<dyn FnOnce()>;

pub type BeforeHook = Box<dyn Fn(&Operation) -> HookOutcome>;
pub type AfterHook = Box<dyn Fn(&Operation, Option<&BlockId>)>;

/// The live containers a normalize hook may inspect and repair.
pub struct NormalizeScope<'a> {
    pub block: Option<BlockId>,
    pub kind: &'a str,
    pub content: &'a LoroList,
    pub data: Option<LoroMap>,
}

/// A kind-specific step of the normalization pass. Returns whether it
/// changed anything; a `true` re-runs the whole pass.
pub type NormalizeHook = Arc<dyn Fn(&NormalizeScope<'_>) -> anyhow::Result<bool>>;

#[derive(Default)]
pub struct PluginRegistry {
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    normalize: HashMap<String, Vec<NormalizeHook>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_operation(&mut self, hook: impl Fn(&Operation) -> HookOutcome + 'static) {
        self.before.push(Box::new(hook));
    }

    pub fn on_after_operation(&mut self, hook: impl Fn(&Operation, Option<&BlockId>) + 'static) {
        self.after.push(Box::new(hook));
    }

    pub fn on_normalize(
        &mut self,
        kind: impl Into<String>,
        hook: impl Fn(&NormalizeScope<'_>) -> anyhow::Result<bool> + 'static,
    ) {
        self.normalize
            .entry(kind.into())
            .or_default()
            .push(Arc::new(hook));
    }

    /// Thread a payload through every before-hook in registration order.
    /// The first cancel wins; later hooks never see a cancelled operation.
    pub(crate) fn run_before(&self, mut op: Operation) -> HookOutcome {
        for hook in &self.before {
            match hook(&op) {
                HookOutcome::Proceed(next) => op = next,
                cancel @ HookOutcome::Cancel(_) => return cancel,
            }
        }
        HookOutcome::Proceed(op)
    }

    pub(crate) fn run_after(&self, op: &Operation, result: Option<&BlockId>) {
        for hook in &self.after {
            hook(op, result);
        }
    }

    pub(crate) fn normalizers(&self, kind: &str) -> &[NormalizeHook] {
        self.normalize
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::ContentAddress;

    fn probe_op() -> Operation {
        Operation::NormalizeContent {
            block: BlockId::from("b1"),
        }
    }

    // ============ Hook pipeline tests ============

    #[test]
    fn test_before_hooks_chain_replacements() {
        let mut registry = PluginRegistry::new();
        registry.on_before_operation(|op| {
            // rewrite every normalize into a split at the content start
            HookOutcome::Proceed(match op {
                Operation::NormalizeContent { block } => Operation::SplitBlock {
                    block: block.clone(),
                    at: ContentAddress::start(),
                },
                other => other.clone(),
            })
        });

        match registry.run_before(probe_op()) {
            HookOutcome::Proceed(Operation::SplitBlock { .. }) => {}
            _ => panic!("expected the replaced payload"),
        }
    }

    #[test]
    fn test_first_cancel_wins() {
        let mut registry = PluginRegistry::new();
        registry.on_before_operation(|_| HookOutcome::Cancel(None));
        registry.on_before_operation(|op| HookOutcome::Proceed(op.clone()));

        assert!(matches!(
            registry.run_before(probe_op()),
            HookOutcome::Cancel(None)
        ));
    }

    #[test]
    fn test_after_hooks_observe_result() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = PluginRegistry::new();
        registry.on_after_operation(move |op, result| {
            sink.borrow_mut()
                .push((op.name(), result.map(|b| b.to_string())));
        });

        registry.run_after(&probe_op(), Some(&BlockId::from("b1")));
        assert_eq!(
            seen.borrow().as_slice(),
            &[("normalize_content", Some("b1".to_string()))]
        );
    }
}
