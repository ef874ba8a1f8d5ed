//! The wire envelope of the tracking channel.
//!
//! Both directions carry a single JSON object discriminated by its `type`
//! field. Dispatch is exhaustive over the known discriminants; anything else
//! lands in the [`ClientMessage::Unknown`] no-op branch.

use courier_domain::{LocationPoint, ParcelId, UserId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Peer-facing reply strings. The frontend matches on these verbatim, so
/// they are stable constants rather than ad-hoc format strings.
pub const ONLY_DRIVERS_SEND: &str = "Only drivers can send location updates";
pub const COORDINATES_REQUIRED: &str = "Latitude and longitude are required";
pub const INVALID_JSON: &str = "Invalid JSON format";
pub const PARCEL_ACCESS_DENIED: &str = "You do not have access to track this parcel";

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A driver's position report. `parcel_id` is optional; when absent, the
    /// parcel requested at connect time (if any) is targeted.
    LocationUpdate {
        lat: Option<f64>,
        lng: Option<f64>,
        #[serde(default)]
        address: String,
        parcel_id: Option<ParcelId>,
    },
    /// Request to start receiving one parcel's location broadcasts.
    SubscribeParcel { parcel_id: Option<ParcelId> },
    /// Request to stop receiving one parcel's location broadcasts.
    UnsubscribeParcel { parcel_id: Option<ParcelId> },
    /// Unknown discriminants are ignored, not errors.
    #[serde(other)]
    Unknown,
}

/// One outbound frame: a direct reply or a fanned-out broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A driver's position, delivered once per group the receiver shares
    /// with the sender (each delivery carries that group's parcel context).
    LocationUpdate {
        driver_id: UserId,
        location: LocationPoint,
        parcel_id: Option<ParcelId>,
    },
    Subscribed { parcel_id: ParcelId },
    Unsubscribed { parcel_id: ParcelId },
    Error { message: Cow<'static, str> },
}

impl ServerMessage {
    /// Builds an `error` reply carrying a peer-facing description.
    pub fn error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Error { message: message.into() }
    }
}
