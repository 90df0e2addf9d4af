//! Node model: the schema registry, the literal value types, and the live
//! mirror of the replicated tree.

pub mod mirror;
pub mod node;
pub mod schema;
pub mod value;
