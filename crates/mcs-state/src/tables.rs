//! redb table definitions for the scheduler state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// RTT matrix rows keyed by source cloud name.
pub const NET_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("net_states");

/// Scheduling run records keyed by run id (ids sort chronologically).
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Auto-created VMs keyed by VM name.
pub const AUTO_VMS: TableDefinition<&str, &[u8]> = TableDefinition::new("auto_vms");
