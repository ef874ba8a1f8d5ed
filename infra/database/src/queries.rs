//! Typed queries over the delivery platform's records.
//!
//! The surrounding CRUD services own these rows; the tracking slice only
//! needs a handful of facts (assignment existence, parcel ownership, active
//! deliveries) and one write path (location samples). The thin write surface
//! below exists for that external workflow and for test arrangement.

use crate::Database;
use crate::error::{DatabaseError, DatabaseErrorExt};
use courier_domain::{LocationPoint, Parcel, ParcelId, ParcelStatus, StatusSet, UserId};
use surrealdb::types::SurrealValue;
use tracing::debug;

#[derive(Debug, SurrealValue)]
struct ParcelRow {
    parcel_id: String,
    tracking_number: String,
    client: String,
    current_status: String,
}

impl ParcelRow {
    fn into_domain(self) -> Result<Parcel, DatabaseError> {
        let current_status = ParcelStatus::parse(&self.current_status).ok_or_else(|| {
            DatabaseError::Internal {
                message: format!("Unknown parcel status '{}'", self.current_status).into(),
                context: Some(self.parcel_id.clone().into()),
            }
        })?;

        Ok(Parcel {
            id: self.parcel_id.into(),
            tracking_number: self.tracking_number,
            client: self.client.into(),
            current_status,
        })
    }
}

/// One stored location observation, as read back for history views.
#[derive(Debug, Clone, PartialEq, SurrealValue)]
pub struct LocationSample {
    pub driver: String,
    pub parcel: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl Database {
    /// True iff the user has at least one assignment as driver, in any
    /// lifecycle state. This is what makes an identity a "driver".
    pub async fn has_assignments(&self, driver: &UserId) -> Result<bool, DatabaseError> {
        let count = self
            .query("SELECT VALUE count() FROM assignment WHERE driver = $driver GROUP ALL")
            .bind(("driver", driver.to_string()))
            .await
            .context("Counting driver assignments")?
            .take::<Option<i64>>(0)
            .context("Parsing assignment count")?;

        Ok(count.unwrap_or_default() > 0)
    }

    /// True iff a client record exists for the user id.
    pub async fn client_exists(&self, user: &UserId) -> Result<bool, DatabaseError> {
        let count = self
            .query("SELECT VALUE count() FROM client WHERE user_id = $user GROUP ALL")
            .bind(("user", user.to_string()))
            .await
            .context("Counting client records")?
            .take::<Option<i64>>(0)
            .context("Parsing client count")?;

        Ok(count.unwrap_or_default() > 0)
    }

    /// True iff the driver is assigned to the given parcel.
    pub async fn assignment_exists(
        &self,
        driver: &UserId,
        parcel: &ParcelId,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .query(
                "SELECT VALUE count() FROM assignment \
                WHERE driver = $driver AND parcel = $parcel GROUP ALL",
            )
            .bind(("driver", driver.to_string()))
            .bind(("parcel", parcel.to_string()))
            .await
            .context("Checking assignment existence")?
            .take::<Option<i64>>(0)
            .context("Parsing assignment count")?;

        Ok(count.unwrap_or_default() > 0)
    }

    /// Resolves a parcel id to its summary record; `None` if unknown.
    pub async fn fetch_parcel(&self, parcel: &ParcelId) -> Result<Option<Parcel>, DatabaseError> {
        let row = self
            .query(
                "SELECT parcel_id, tracking_number, client, current_status \
                FROM parcel WHERE parcel_id = $parcel LIMIT 1",
            )
            .bind(("parcel", parcel.to_string()))
            .await
            .context("Fetching parcel")?
            .take::<Vec<ParcelRow>>(0)
            .context("Parsing parcel row")?
            .into_iter()
            .next();

        row.map(ParcelRow::into_domain).transpose()
    }

    /// Ids of parcels assigned to the driver whose lifecycle state is in
    /// `statuses`. Broadcast fan-out targets exactly this set.
    pub async fn active_parcels_for_driver(
        &self,
        driver: &UserId,
        statuses: StatusSet,
    ) -> Result<Vec<ParcelId>, DatabaseError> {
        let assigned = self
            .query("SELECT VALUE parcel FROM assignment WHERE driver = $driver")
            .bind(("driver", driver.to_string()))
            .await
            .context("Listing driver assignments")?
            .take::<Vec<String>>(0)
            .context("Parsing assignment parcels")?;

        if assigned.is_empty() {
            return Ok(Vec::new());
        }

        let active = self
            .query(
                "SELECT VALUE parcel_id FROM parcel \
                WHERE parcel_id IN $parcels AND current_status IN $statuses",
            )
            .bind(("parcels", assigned))
            .bind(("statuses", statuses.as_strings()))
            .await
            .context("Filtering parcels by status")?
            .take::<Vec<String>>(0)
            .context("Parsing active parcels")?;

        Ok(active.into_iter().map(ParcelId::from).collect())
    }

    /// Writes one location sample with a server-assigned timestamp.
    ///
    /// The parcel reference is resolved first; a stale or unknown id is
    /// dropped rather than failing the write, so tracking stays live even
    /// when the referenced parcel has been cleaned up.
    pub async fn insert_location(
        &self,
        driver: &UserId,
        parcel: Option<&ParcelId>,
        point: &LocationPoint,
    ) -> Result<(), DatabaseError> {
        let parcel_ref = match parcel {
            Some(id) => match self.fetch_parcel(id).await {
                Ok(Some(found)) => Some(found.id.into_inner()),
                Ok(None) => {
                    debug!(parcel = %id, "Parcel reference not found; recording without it");
                    None
                },
                Err(e) => {
                    debug!(parcel = %id, error = %e, "Parcel resolution failed; recording without it");
                    None
                },
            },
            None => None,
        };

        self.query(
            "CREATE location CONTENT { \
                driver: $driver, \
                parcel: $parcel, \
                latitude: $latitude, \
                longitude: $longitude, \
                address: $address \
            }",
        )
        .bind(("driver", driver.to_string()))
        .bind(("parcel", parcel_ref))
        .bind(("latitude", point.lat))
        .bind(("longitude", point.lng))
        .bind(("address", point.address.clone()))
        .await
        .context("Inserting location sample")?
        .check()
        .map_err(surrealdb::Error::from)
        .context("Inserting location sample")?;

        Ok(())
    }

    /// Number of stored samples for the driver.
    pub async fn location_count(&self, driver: &UserId) -> Result<usize, DatabaseError> {
        let count = self
            .query("SELECT VALUE count() FROM location WHERE driver = $driver GROUP ALL")
            .bind(("driver", driver.to_string()))
            .await
            .context("Counting location samples")?
            .take::<Option<i64>>(0)
            .context("Parsing location count")?;

        Ok(usize::try_from(count.unwrap_or_default()).unwrap_or_default())
    }

    /// Most recent samples for the driver, newest first.
    pub async fn recent_locations(
        &self,
        driver: &UserId,
        limit: usize,
    ) -> Result<Vec<LocationSample>, DatabaseError> {
        let samples = self
            .query(
                "SELECT driver, parcel, latitude, longitude, address \
                FROM location WHERE driver = $driver \
                ORDER BY recorded_at DESC LIMIT $limit",
            )
            .bind(("driver", driver.to_string()))
            .bind(("limit", i64::try_from(limit).unwrap_or(i64::MAX)))
            .await
            .context("Listing recent locations")?
            .take::<Vec<LocationSample>>(0)
            .context("Parsing location samples")?;

        Ok(samples)
    }

    // --- Directory writes, owned by the external assignment/registration
    // workflows; the tracking core never calls these. ---

    /// Registers a client record.
    pub async fn create_client(
        &self,
        user: &UserId,
        full_name: &str,
        email: &str,
    ) -> Result<(), DatabaseError> {
        self.query(
            "CREATE client CONTENT { user_id: $user, full_name: $full_name, email: $email }",
        )
        .bind(("user", user.to_string()))
        .bind(("full_name", full_name.to_owned()))
        .bind(("email", email.to_owned()))
        .await
        .context("Creating client")?
        .check()
        .map_err(surrealdb::Error::from)
        .context("Creating client")?;

        Ok(())
    }

    /// Registers a parcel record.
    pub async fn create_parcel(&self, parcel: &Parcel) -> Result<(), DatabaseError> {
        self.query(
            "CREATE parcel CONTENT { \
                parcel_id: $parcel_id, \
                tracking_number: $tracking_number, \
                client: $client, \
                current_status: $current_status \
            }",
        )
        .bind(("parcel_id", parcel.id.to_string()))
        .bind(("tracking_number", parcel.tracking_number.clone()))
        .bind(("client", parcel.client.to_string()))
        .bind(("current_status", parcel.current_status.as_str()))
        .await
        .context("Creating parcel")?
        .check()
        .map_err(surrealdb::Error::from)
        .context("Creating parcel")?;

        Ok(())
    }

    /// Records a driver assignment. One driver per parcel (unique index).
    pub async fn assign_driver(
        &self,
        driver: &UserId,
        parcel: &ParcelId,
    ) -> Result<(), DatabaseError> {
        self.query("CREATE assignment CONTENT { driver: $driver, parcel: $parcel }")
            .bind(("driver", driver.to_string()))
            .bind(("parcel", parcel.to_string()))
            .await
            .context("Creating assignment")?
            .check()
            .map_err(surrealdb::Error::from)
            .context("Creating assignment")?;

        Ok(())
    }

    /// Moves a parcel to a new lifecycle state.
    pub async fn set_parcel_status(
        &self,
        parcel: &ParcelId,
        status: ParcelStatus,
    ) -> Result<(), DatabaseError> {
        self.query("UPDATE parcel SET current_status = $status WHERE parcel_id = $parcel")
            .bind(("parcel", parcel.to_string()))
            .bind(("status", status.as_str()))
            .await
            .context("Updating parcel status")?
            .check()
            .map_err(surrealdb::Error::from)
            .context("Updating parcel status")?;

        Ok(())
    }
}
