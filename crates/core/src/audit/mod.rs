//! Audit trail of batch, task and delivery events, persisted to SQLite.
//!
//! Failed deliveries are also kept as dead letters that can be replayed.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
