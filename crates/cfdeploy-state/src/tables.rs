//! redb table definitions for the cfdeploy state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Application records keyed by resource address.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");
