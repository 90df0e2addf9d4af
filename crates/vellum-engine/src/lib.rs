//! Collaborative block-document mutation engine.
//!
//! A document is a tree of blocks (paragraphs, list items, quotes...) whose
//! leaves hold inline content: attributed text runs and inline embeds. The
//! whole tree lives in a replicated CRDT document (Loro), so multiple peers
//! edit concurrently without coordination; this crate owns the mutation
//! engine on top of it — the structural operations (split, merge, nest,
//! move, remove, normalize...), the text/mark operations, and the selection
//! model that turns a UI's raw cursor events into precise tree coordinates.
//!
//! The replicated document is the single source of truth. The in-memory
//! [`model::mirror::Mirror`] is a disposable cache rebuilt from change
//! events; operations mutate the live containers inside one transaction and
//! the mirror catches up when the transaction commits. Every operation
//! leaves the tree well-formed: content starts and ends with a text run,
//! with no adjacent duplicate runs and no adjacent embeds — the
//! normalization pass repairs any violation rather than rejecting it.
//!
//! ```
//! use vellum_engine::{BlockValue, Editor, Schema};
//!
//! let mut editor = Editor::new(Schema::basic());
//! editor
//!     .load_value(&[BlockValue::with_text("paragraph", "Hello")])
//!     .unwrap();
//! assert_eq!(editor.value()[0].plain_text(), "Hello");
//! ```

pub mod editor;
pub mod model;
pub mod ops;
pub mod plugin;
pub mod selection;
pub mod store;

pub use editor::{Editor, InputIntent};
pub use model::mirror::Mirror;
pub use model::node::{BlockId, BlockPath, ContentAddress};
pub use model::schema::{BlockDefinition, BlockRole, Schema, SchemaBuilder, SchemaError};
pub use model::value::{BlockValue, ContentValue};
pub use ops::{DeleteDirection, Operation};
pub use plugin::{HookOutcome, NormalizeScope, PluginRegistry, Recovery};
pub use selection::{RawSelection, SelectionSnapshot, TextPoint, ViewId, ViewTarget};
pub use store::{Marks, Segment, StoreError};
