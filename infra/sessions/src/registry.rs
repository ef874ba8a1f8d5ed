use crate::error::SessionError;
use crate::group::{ConnectionId, GroupKey};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A safe default for connection mailboxes.
/// 128 covers bursts of broadcasts without letting a stalled peer hoard memory.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 128;
const MIN_CAPACITY: usize = 1;

/// Marker trait for payloads that can be fanned out through the registry.
///
/// Any type that is `Send + Sync + 'static` automatically implements this trait.
pub trait Event: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Event for T {}

struct ConnectionState<E> {
    mailbox: mpsc::Sender<Arc<E>>,
    groups: FxHashSet<GroupKey>,
}

struct Tables<E> {
    connections: FxHashMap<ConnectionId, ConnectionState<E>>,
    groups: FxHashMap<GroupKey, FxHashSet<ConnectionId>>,
}

impl<E> Default for Tables<E> {
    fn default() -> Self {
        Self { connections: FxHashMap::default(), groups: FxHashMap::default() }
    }
}

/// Thread-safe registry of live connections and their group memberships.
///
/// Owned by the server and injected into the tracking slice at startup;
/// never a process-wide singleton. Fan-out collects member mailboxes under
/// the read lock and delivers outside it, so a slow peer cannot hold the
/// tables hostage.
pub struct SessionRegistry<E> {
    tables: Arc<RwLock<Tables<E>>>,
}

impl<E> Clone for SessionRegistry<E> {
    fn clone(&self) -> Self {
        Self { tables: Arc::clone(&self.tables) }
    }
}

impl<E> Default for SessionRegistry<E> {
    fn default() -> Self {
        Self { tables: Arc::new(RwLock::new(Tables::default())) }
    }
}

impl<E> fmt::Debug for SessionRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("SessionRegistry")
            .field("connections", &tables.connections.len())
            .field("groups", &tables.groups.len())
            .finish()
    }
}

impl<E: Event> SessionRegistry<E> {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the receiving half of its mailbox.
    ///
    /// The caller pumps the receiver into its transport; dropping the
    /// receiver makes subsequent deliveries to this connection no-ops until
    /// [`SessionRegistry::disconnect`] cleans the membership up.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidCapacity`] if `capacity` is zero, or
    /// [`SessionError::AlreadyRegistered`] if the id is already live.
    pub fn connect(
        &self,
        conn: &ConnectionId,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Arc<E>>, SessionError> {
        if capacity < MIN_CAPACITY {
            return Err(SessionError::InvalidCapacity {
                message: format!("capacity must be >= {MIN_CAPACITY}").into(),
                context: None,
            });
        }

        let (tx, rx) = mpsc::channel(capacity);
        let mut tables = self.tables.write();
        if tables.connections.contains_key(conn) {
            return Err(SessionError::AlreadyRegistered {
                message: conn.to_string().into(),
                context: None,
            });
        }
        tables.connections.insert(
            conn.clone(),
            ConnectionState { mailbox: tx, groups: FxHashSet::default() },
        );
        trace!(connection = %conn, capacity, "Connection registered");
        Ok(rx)
    }

    /// Adds the connection to a group. Idempotent.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownConnection`] if the connection was
    /// never registered (or already disconnected).
    pub fn join(&self, conn: &ConnectionId, group: GroupKey) -> Result<(), SessionError> {
        let mut tables = self.tables.write();
        let Tables { connections, groups } = &mut *tables;
        let Some(state) = connections.get_mut(conn) else {
            return Err(SessionError::UnknownConnection {
                message: conn.to_string().into(),
                context: Some(group.to_string().into()),
            });
        };

        if state.groups.insert(group.clone()) {
            groups.entry(group.clone()).or_default().insert(conn.clone());
            trace!(connection = %conn, group = %group, "Joined group");
        }
        Ok(())
    }

    /// Removes the connection from a group.
    ///
    /// Idempotent and unconditional: leaving a group that was never joined,
    /// or leaving after disconnect, is a no-op.
    pub fn leave(&self, conn: &ConnectionId, group: &GroupKey) {
        let mut tables = self.tables.write();
        let Tables { connections, groups } = &mut *tables;
        if let Some(state) = connections.get_mut(conn) {
            state.groups.remove(group);
        }
        if let Some(members) = groups.get_mut(group) {
            members.remove(conn);
            if members.is_empty() {
                groups.remove(group);
            }
        }
        trace!(connection = %conn, group = %group, "Left group");
    }

    /// Releases every membership of the connection and drops its mailbox.
    ///
    /// Runs under a single write lock, so no broadcast can observe a
    /// half-removed connection. Idempotent; returns the number of
    /// memberships released.
    pub fn disconnect(&self, conn: &ConnectionId) -> usize {
        let mut tables = self.tables.write();
        let Tables { connections, groups } = &mut *tables;
        let Some(state) = connections.remove(conn) else {
            return 0;
        };

        let released = state.groups.len();
        for group in &state.groups {
            if let Some(members) = groups.get_mut(group) {
                members.remove(conn);
                if members.is_empty() {
                    groups.remove(group);
                }
            }
        }
        trace!(connection = %conn, released, "Connection disconnected");
        released
    }

    /// Delivers an event to every current member of the group.
    ///
    /// Returns the number of mailboxes the event reached.
    pub fn publish(&self, group: &GroupKey, event: E) -> usize {
        self.publish_arc(group, Arc::new(event))
    }

    /// Delivers a shared event instance without re-wrapping.
    ///
    /// Members that disconnect mid-fan-out are skipped; a full mailbox drops
    /// this delivery for that member with a warning rather than blocking the
    /// publisher.
    pub fn publish_arc(&self, group: &GroupKey, event: Arc<E>) -> usize {
        let mailboxes: Vec<(ConnectionId, mpsc::Sender<Arc<E>>)> = {
            let tables = self.tables.read();
            tables.groups.get(group).map_or_else(Vec::new, |members| {
                members
                    .iter()
                    .filter_map(|conn| {
                        tables
                            .connections
                            .get(conn)
                            .map(|state| (conn.clone(), state.mailbox.clone()))
                    })
                    .collect()
            })
        };

        let mut delivered = 0;
        for (conn, mailbox) in mailboxes {
            match mailbox.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %conn, group = %group, "Mailbox full; dropping broadcast");
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(connection = %conn, group = %group, "Mailbox closed; skipping member");
                },
            }
        }

        if delivered == 0 {
            trace!(group = %group, "Broadcast reached no active members");
        }
        delivered
    }

    /// Number of members currently joined to the group.
    #[must_use]
    pub fn member_count(&self, group: &GroupKey) -> usize {
        self.tables.read().groups.get(group).map_or(0, |members| members.len())
    }

    /// Whether the connection currently belongs to the group.
    #[must_use]
    pub fn is_member(&self, conn: &ConnectionId, group: &GroupKey) -> bool {
        self.tables.read().groups.get(group).is_some_and(|members| members.contains(conn))
    }

    /// Number of live registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.tables.read().connections.len()
    }

    /// Gracefully tears down the registry by dropping all mailboxes.
    ///
    /// Returns the number of connections that were closed.
    #[must_use]
    pub fn shutdown(&self) -> usize {
        let mut tables = self.tables.write();
        let count = tables.connections.len();
        tables.connections.clear();
        tables.groups.clear();
        count
    }
}
