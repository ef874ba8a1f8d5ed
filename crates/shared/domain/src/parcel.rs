use crate::id::{ParcelId, UserId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a parcel, owned by the external delivery workflow.
/// The tracking core only reads it to decide which parcels are "live".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelStatus {
    Pending,
    Accepted,
    Assigned,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl ParcelStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Accepted,
        Self::Assigned,
        Self::PickedUp,
        Self::InTransit,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Assigned => "assigned",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stored status string; `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// A parcel in one of these states has a delivery in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Assigned | Self::PickedUp | Self::InTransit | Self::OutForDelivery)
    }
}

bitflags! {
    /// Represents a set of parcel lifecycle states, used to filter
    /// assignment queries without enumerating statuses at every call site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct StatusSet: u32 {
        const PENDING = 1 << 0;
        const ACCEPTED = 1 << 1;
        const ASSIGNED = 1 << 2;
        const PICKED_UP = 1 << 3;
        const IN_TRANSIT = 1 << 4;
        const OUT_FOR_DELIVERY = 1 << 5;
        const DELIVERED = 1 << 6;
        const CANCELLED = 1 << 7;

        /// States with a delivery in flight; location broadcasts target these.
        const ACTIVE = Self::ASSIGNED.bits()
            | Self::PICKED_UP.bits()
            | Self::IN_TRANSIT.bits()
            | Self::OUT_FOR_DELIVERY.bits();
    }
}

impl StatusSet {
    /// The statuses contained in the set, as their stored strings.
    #[must_use]
    pub fn as_strings(self) -> Vec<&'static str> {
        ParcelStatus::ALL
            .into_iter()
            .filter(|status| self.contains(Self::from(*status)))
            .map(ParcelStatus::as_str)
            .collect()
    }
}

impl From<ParcelStatus> for StatusSet {
    fn from(status: ParcelStatus) -> Self {
        match status {
            ParcelStatus::Pending => Self::PENDING,
            ParcelStatus::Accepted => Self::ACCEPTED,
            ParcelStatus::Assigned => Self::ASSIGNED,
            ParcelStatus::PickedUp => Self::PICKED_UP,
            ParcelStatus::InTransit => Self::IN_TRANSIT,
            ParcelStatus::OutForDelivery => Self::OUT_FOR_DELIVERY,
            ParcelStatus::Delivered => Self::DELIVERED,
            ParcelStatus::Cancelled => Self::CANCELLED,
        }
    }
}

/// Summary of a parcel as the tracking core sees it.
///
/// The full parcel record (route, weight, pricing) belongs to the external
/// CRUD surface; only ownership and lifecycle matter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: ParcelId,
    pub tracking_number: String,
    pub client: UserId,
    pub current_status: ParcelStatus,
}

/// A single observed position, as carried in broadcast payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in ParcelStatus::ALL {
            assert_eq!(ParcelStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ParcelStatus::parse("returned"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ParcelStatus::OutForDelivery).unwrap();
        assert_eq!(json, "\"out_for_delivery\"");
    }

    #[test]
    fn active_set_matches_is_active() {
        for status in ParcelStatus::ALL {
            assert_eq!(StatusSet::ACTIVE.contains(StatusSet::from(status)), status.is_active());
        }
    }

    #[test]
    fn active_set_strings_cover_the_in_flight_states() {
        let strings = StatusSet::ACTIVE.as_strings();
        assert_eq!(strings, vec!["assigned", "picked_up", "in_transit", "out_for_delivery"]);
    }
}
