//! `xr-lexicon` — lexicon documents, the reference resolver, and the value
//! validator shared by the xrpc client and server.

pub mod bundled;
pub mod catalog;
pub mod formats;
pub mod loader;
pub mod model;
pub mod params;
pub mod validate;

pub use catalog::{Catalog, CatalogBuilder, Resolved};
pub use loader::{parse_document, Document};
pub use model::{Body, Definition, MethodDef, SchemaNode, JSON_ENCODING};
pub use params::{decode_params, encode_params, loggable};
pub use validate::{Direction, UnionMatch, Validator};
