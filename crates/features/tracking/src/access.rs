use crate::error::TrackingError;
use courier_database::Database;
use courier_domain::{ParcelId, StatusSet, UserId};

/// Decides what an authenticated identity may do, from relationship facts
/// alone: driver-assigned-to-parcel or client-owns-parcel. Pure reads; the
/// external assignment workflow owns the facts themselves.
#[derive(Debug, Clone)]
pub struct AccessAuthority {
    database: Database,
}

impl AccessAuthority {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// True iff the subject is known to the platform: a registered client or
    /// a driver with at least one assignment.
    pub async fn identity_exists(&self, user: &UserId) -> Result<bool, TrackingError> {
        if self.database.client_exists(user).await? {
            return Ok(true);
        }
        Ok(self.database.has_assignments(user).await?)
    }

    /// Role for the whole session: driver iff at least one assignment
    /// exists. Computed once at handshake, never rechecked per message.
    pub async fn is_driver(&self, user: &UserId) -> Result<bool, TrackingError> {
        Ok(self.database.has_assignments(user).await?)
    }

    /// Whether the identity may read/write tracking data for the parcel.
    ///
    /// Drivers must hold the assignment for this exact parcel; everyone else
    /// must be its owning client. An unknown parcel grants nothing.
    pub async fn can_access_parcel(
        &self,
        user: &UserId,
        parcel: &ParcelId,
        is_driver: bool,
    ) -> Result<bool, TrackingError> {
        if is_driver {
            return Ok(self.database.assignment_exists(user, parcel).await?);
        }

        let Some(found) = self.database.fetch_parcel(parcel).await? else {
            return Ok(false);
        };
        Ok(found.client == *user)
    }

    /// Parcels assigned to the driver with a delivery currently in flight.
    /// Queried fresh on every location update so completed deliveries drop
    /// out of the broadcast set immediately.
    pub async fn active_parcels(&self, driver: &UserId) -> Result<Vec<ParcelId>, TrackingError> {
        Ok(self.database.active_parcels_for_driver(driver, StatusSet::ACTIVE).await?)
    }
}
