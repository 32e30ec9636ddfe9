//! mcs-state: embedded state store for the multi-cloud scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), keeps what must survive a
//! restart: the inter-cloud RTT matrix, a record of every scheduling run,
//! and the VMs the scheduler created so garbage collection can find them.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by a natural name (source cloud, run id, VM name). Run ids embed a
//! zero-padded millisecond timestamp so a reverse scan yields newest first.
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
