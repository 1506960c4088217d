//! Pure path-addressed operations on a nested JSON document.
//!
//! The engine never performs I/O and never retains a reference to the
//! document between calls; the store owns the document and passes it in.

pub mod ops;
pub mod path;
pub mod query;

pub use ops::{get, remove, set, update};
pub use query::QueryOptions;
