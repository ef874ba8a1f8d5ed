use courier_domain::{ParcelId, UserId};
use std::fmt;

/// Identifies one live connection for the lifetime of its socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name of a broadcast group.
///
/// Group identity is structural rather than a concatenated string, so the
/// driver and parcel namespaces cannot collide or be typo'd into each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Mirror group carrying one driver's own updates.
    Driver(UserId),
    /// Everyone watching one parcel's delivery.
    Parcel(ParcelId),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(id) => write!(f, "driver:{id}"),
            Self::Parcel(id) => write!(f, "parcel:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_keys_render_with_their_namespace() {
        assert_eq!(GroupKey::Driver(UserId::from("d1")).to_string(), "driver:d1");
        assert_eq!(GroupKey::Parcel(ParcelId::from("p9")).to_string(), "parcel:p9");
    }

    #[test]
    fn driver_and_parcel_namespaces_never_collide() {
        let driver = GroupKey::Driver(UserId::from("42"));
        let parcel = GroupKey::Parcel(ParcelId::from("42"));
        assert_ne!(driver, parcel);
    }
}
