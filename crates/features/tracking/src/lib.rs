//! Live driver tracking feature slice.
//!
//! The one real-time corner of the delivery platform: drivers stream their
//! position over a persistent connection, interested parties (the driver's
//! own devices, clients watching a parcel) receive the stream through
//! per-driver and per-parcel broadcast groups, and every Nth accepted update
//! is persisted as a location sample.
//!
//! The slice owns connection authentication ([`IdentityVerifier`]), access
//! decisions ([`AccessAuthority`]), the per-connection protocol state
//! machine ([`TrackingSession`]), and throttled persistence
//! ([`LocationRecorder`]). Group membership and fan-out live in the injected
//! [`courier_sessions::SessionRegistry`].

mod access;
mod error;
mod identity;
mod message;
mod session;
mod store;

pub use access::AccessAuthority;
pub use error::{TrackingError, TrackingErrorExt};
pub use identity::{Identity, IdentityVerifier};
pub use message::{
    COORDINATES_REQUIRED, ClientMessage, INVALID_JSON, ONLY_DRIVERS_SEND, PARCEL_ACCESS_DENIED,
    ServerMessage,
};
pub use session::{Mailbox, TrackingSession};
pub use store::LocationRecorder;

use courier_database::Database;
use courier_domain::config::AppConfig;
use courier_sessions::SessionRegistry;
use tracing::{info, warn};

/// The session registry instantiated for tracking broadcasts.
pub type TrackingRegistry = SessionRegistry<ServerMessage>;

/// Tracking feature state: everything a connection handshake needs.
#[derive(Debug, Clone)]
pub struct Tracking {
    pub(crate) verifier: IdentityVerifier,
    pub(crate) authority: AccessAuthority,
    pub(crate) registry: TrackingRegistry,
    pub(crate) recorder: LocationRecorder,
    pub(crate) persist_every: u32,
    pub(crate) mailbox_capacity: usize,
}

/// Initialize the tracking feature.
///
/// The registry is created and torn down by the server; the slice only
/// borrows a handle to it. Must run inside the async runtime — the location
/// writer task is spawned here.
///
/// # Errors
/// Returns [`TrackingError::Config`] if the JWT configuration is unusable.
pub fn init(
    config: &AppConfig,
    database: &Database,
    registry: &TrackingRegistry,
) -> Result<Tracking, TrackingError> {
    let verifier = IdentityVerifier::new(&config.security.jwt)?;

    let mut persist_every = config.tracking.persist_every;
    if persist_every == 0 {
        warn!("tracking.persist_every of 0 is meaningless; persisting every update");
        persist_every = 1;
    }

    let recorder = LocationRecorder::spawn(database.clone(), config.tracking.write_queue_capacity);

    info!(persist_every, "Tracking feature slice initialized");

    Ok(Tracking {
        verifier,
        authority: AccessAuthority::new(database.clone()),
        registry: registry.clone(),
        recorder,
        persist_every,
        mailbox_capacity: config.tracking.mailbox_capacity,
    })
}
