//! Record schemas: field types, validation and the ordered collection catalog.

pub mod catalog;
pub mod node;
pub mod validate;

pub use catalog::{Catalog, CollectionSchema};
pub use node::{t, SchemaNode};
pub use validate::{is_valid_iso_date, validate, validate_fields};
