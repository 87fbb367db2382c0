//! `xr-domain` — types shared by every xrpc crate: NSIDs, method kinds, the
//! error taxonomy, configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod kind;
pub mod nsid;
pub mod stage;
pub mod trace;

pub use error::{Error, Result, SchemaLoadError, ValidationError};
pub use kind::MethodKind;
pub use nsid::{is_valid_nsid, Nsid};
pub use stage::Stage;
