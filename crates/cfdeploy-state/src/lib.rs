//! cfdeploy-state: persisted resource records.
//!
//! Backed by [redb](https://docs.rs/redb). Each managed application is stored
//! as one [`AppRecord`] holding the last applied config, the observed
//! application, its route mappings and service bindings, and the registry of
//! deposed resources a rollover left behind. Records are JSON-serialized into
//! redb's `&[u8]` value columns.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
