//! The four specialized index structures behind the hybrid store.
//!
//! Each index is an owned, explicitly-constructed value on the store
//! handle, with no process-wide state, so multiple stores coexist without
//! interference. Mutation is serialized per index; reads see the
//! last-committed state and never block reads of another index type.

pub mod fuzzy;
pub mod geo;
pub mod lexical;
pub mod semantic;

pub use fuzzy::FuzzyNameIndex;
pub use geo::GeoIndex;
pub use lexical::LexicalIndex;
pub use semantic::{GraphConfig, SemanticIndex};
