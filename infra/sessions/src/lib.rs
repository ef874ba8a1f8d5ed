//! # Session Registry
//!
//! Tracks which live connections belong to which broadcast groups and fans
//! events out to them.
//!
//! ## Overview
//!
//! Every accepted connection registers a bounded outbound mailbox here. Group
//! membership is a pair of tables (connection → joined groups, group →
//! members) guarded by a single lock; these tables are the only shared
//! mutable state in the tracking subsystem. A group with no members does not
//! exist as far as callers can observe.
//!
//! ## Guarantees
//!
//! * **Idempotent membership**: joining twice or leaving a group that was
//!   never joined is a no-op.
//! * **Atomic teardown**: `disconnect` releases every membership of a
//!   connection under one lock; no orphaned memberships survive it.
//! * **Non-blocking fan-out**: `publish` never waits on a slow member. A
//!   full or closed mailbox is skipped, not an error.
//!
//! # Example
//!
//! ```rust
//! use courier_sessions::{ConnectionId, GroupKey, SessionRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), courier_sessions::SessionError> {
//! let registry = SessionRegistry::<String>::new();
//! let conn = ConnectionId::from("c1");
//! let mut mailbox = registry.connect(&conn, 8)?;
//!
//! let group = GroupKey::Parcel("P100".into());
//! registry.join(&conn, group.clone())?;
//! registry.publish(&group, "position".to_owned());
//!
//! assert_eq!(*mailbox.recv().await.unwrap(), "position");
//! # Ok(())
//! # }
//! ```

mod error;
mod group;
mod registry;

pub use error::{SessionError, SessionErrorExt};
pub use group::{ConnectionId, GroupKey};
pub use registry::{DEFAULT_MAILBOX_CAPACITY, Event, SessionRegistry};
