use crate::Tracking;
use crate::error::TrackingError;
use crate::identity::Identity;
use crate::message::{
    COORDINATES_REQUIRED, ClientMessage, INVALID_JSON, ONLY_DRIVERS_SEND, PARCEL_ACCESS_DENIED,
    ServerMessage,
};
use courier_domain::{LocationPoint, ParcelId, UserId};
use courier_kernel::safe_nanoid;
use courier_sessions::{ConnectionId, GroupKey};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound half of an accepted connection: broadcasts fanned out by other
/// sessions (and this one's own mirror group) arrive here.
pub type Mailbox = mpsc::Receiver<Arc<ServerMessage>>;

impl Tracking {
    /// Runs the connection handshake: verify the credential, resolve the
    /// session role, register the mailbox, and join the initial groups.
    ///
    /// Refusals leave no trace: a rejected connection holds no memberships.
    ///
    /// # Errors
    /// * [`TrackingError::Authentication`] — missing/invalid credential or
    ///   unknown subject.
    /// * [`TrackingError::Authorization`] — the requested parcel is not
    ///   accessible to this identity.
    /// * [`TrackingError::Internal`] — collaborator reads failed before the
    ///   connection could be authorized.
    pub async fn connect(
        &self,
        token: Option<&str>,
        requested_parcel: Option<ParcelId>,
    ) -> Result<(TrackingSession, Mailbox), TrackingError> {
        let Identity::Known(user) = self.verifier.verify(token) else {
            debug!("Connection rejected: unauthenticated");
            return Err(TrackingError::Authentication {
                message: "Connection rejected: unauthenticated".into(),
                context: None,
            });
        };

        if !self.authority.identity_exists(&user).await? {
            debug!(user = %user, "Connection rejected: unknown subject");
            return Err(TrackingError::Authentication {
                message: "Connection rejected: unknown subject".into(),
                context: None,
            });
        }

        let is_driver = self.authority.is_driver(&user).await?;

        let conn = ConnectionId::from(safe_nanoid!());
        let mailbox = self.registry.connect(&conn, self.mailbox_capacity)?;

        if let Err(e) =
            self.join_initial_groups(&conn, &user, is_driver, requested_parcel.as_ref()).await
        {
            // A refused connection never keeps memberships.
            self.registry.disconnect(&conn);
            return Err(e);
        }

        info!(connection = %conn, user = %user, is_driver, "Tracking session opened");

        let session = TrackingSession {
            conn,
            user,
            is_driver,
            default_parcel: requested_parcel,
            update_count: 0,
            closed: false,
            shared: self.clone(),
        };
        Ok((session, mailbox))
    }

    async fn join_initial_groups(
        &self,
        conn: &ConnectionId,
        user: &UserId,
        is_driver: bool,
        requested_parcel: Option<&ParcelId>,
    ) -> Result<(), TrackingError> {
        if is_driver {
            self.registry.join(conn, GroupKey::Driver(user.clone()))?;
        }

        if let Some(parcel) = requested_parcel {
            if !self.authority.can_access_parcel(user, parcel, is_driver).await? {
                debug!(user = %user, parcel = %parcel, "Connection rejected: parcel access denied");
                return Err(TrackingError::Authorization {
                    message: PARCEL_ACCESS_DENIED.into(),
                    context: Some(parcel.to_string().into()),
                });
            }
            self.registry.join(conn, GroupKey::Parcel(parcel.clone()))?;
        }

        Ok(())
    }
}

/// Per-connection protocol state machine.
///
/// One session handles one peer's frames sequentially; concurrency exists
/// only across sessions. After the handshake the only transition left is
/// `Open → Closed`, which releases every group membership atomically.
///
/// There is no heartbeat or idle timeout here: a session lives until the
/// peer disconnects or the transport drops. Anything beyond transport-level
/// ping/pong is an inherited gap, intentionally not filled.
#[derive(Debug)]
pub struct TrackingSession {
    conn: ConnectionId,
    user: UserId,
    is_driver: bool,
    default_parcel: Option<ParcelId>,
    update_count: u64,
    closed: bool,
    shared: Tracking,
}

impl TrackingSession {
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.conn
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    #[must_use]
    pub const fn is_driver(&self) -> bool {
        self.is_driver
    }

    /// Accepted location updates so far, scoped to this connection.
    #[must_use]
    pub const fn update_count(&self) -> u64 {
        self.update_count
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handles one inbound frame and returns the direct reply, if any.
    ///
    /// Broadcasts triggered by the frame are routed through the session
    /// registry, not returned here. No frame ever closes the session: every
    /// in-session failure degrades to an `error` reply.
    pub async fn handle_text(&mut self, raw: &str) -> Option<ServerMessage> {
        if self.closed {
            return None;
        }

        let message = match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %self.conn, error = %e, "Malformed payload");
                return Some(ServerMessage::error(INVALID_JSON));
            },
        };

        match self.dispatch(message).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    TrackingError::Protocol { .. } | TrackingError::Authorization { .. } => {
                        debug!(connection = %self.conn, error = %e, "Rejected message");
                    },
                    _ => warn!(connection = %self.conn, error = %e, "Message handling failed"),
                }
                Some(ServerMessage::error(e.peer_message()))
            },
        }
    }

    async fn dispatch(
        &mut self,
        message: ClientMessage,
    ) -> Result<Option<ServerMessage>, TrackingError> {
        match message {
            ClientMessage::LocationUpdate { lat, lng, address, parcel_id } => {
                self.handle_location_update(lat, lng, address, parcel_id).await
            },
            ClientMessage::SubscribeParcel { parcel_id } => self.handle_subscribe(parcel_id).await,
            ClientMessage::UnsubscribeParcel { parcel_id } => Ok(self.handle_unsubscribe(parcel_id)),
            // Unknown discriminants are a no-op, not an error.
            ClientMessage::Unknown => Ok(None),
        }
    }

    async fn handle_location_update(
        &mut self,
        lat: Option<f64>,
        lng: Option<f64>,
        address: String,
        parcel_id: Option<ParcelId>,
    ) -> Result<Option<ServerMessage>, TrackingError> {
        if !self.is_driver {
            return Err(TrackingError::Protocol {
                message: ONLY_DRIVERS_SEND.into(),
                context: None,
            });
        }

        // Absent coordinates are a protocol error; 0.0 is a valid position.
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return Err(TrackingError::Protocol {
                message: COORDINATES_REQUIRED.into(),
                context: None,
            });
        };

        // An update without a parcel targets the one requested at connect time.
        let target = parcel_id.or_else(|| self.default_parcel.clone());
        let location = LocationPoint { lat, lng, address };

        self.update_count += 1;
        if self.update_count % u64::from(self.shared.persist_every) == 0 {
            self.shared.recorder.record(self.user.clone(), target.clone(), location.clone());
        }

        // Three audiences: every parcel this driver is actively delivering,
        // the explicitly targeted parcel, and the driver's own mirror group.
        let assigned = self.shared.authority.active_parcels(&self.user).await?;
        for parcel in &assigned {
            self.broadcast(GroupKey::Parcel(parcel.clone()), &location, Some(parcel.clone()));
        }

        if let Some(parcel) = &target
            && !assigned.contains(parcel)
        {
            self.broadcast(GroupKey::Parcel(parcel.clone()), &location, Some(parcel.clone()));
        }

        self.broadcast(GroupKey::Driver(self.user.clone()), &location, target);

        Ok(None)
    }

    fn broadcast(&self, group: GroupKey, location: &LocationPoint, parcel_id: Option<ParcelId>) {
        let event = ServerMessage::LocationUpdate {
            driver_id: self.user.clone(),
            location: location.clone(),
            parcel_id,
        };
        self.shared.registry.publish(&group, event);
    }

    async fn handle_subscribe(
        &mut self,
        parcel_id: Option<ParcelId>,
    ) -> Result<Option<ServerMessage>, TrackingError> {
        // A subscribe without a parcel id is silently ignored.
        let Some(parcel) = parcel_id else {
            return Ok(None);
        };

        if !self.shared.authority.can_access_parcel(&self.user, &parcel, self.is_driver).await? {
            return Err(TrackingError::Authorization {
                message: PARCEL_ACCESS_DENIED.into(),
                context: Some(parcel.to_string().into()),
            });
        }

        self.shared.registry.join(&self.conn, GroupKey::Parcel(parcel.clone()))?;
        Ok(Some(ServerMessage::Subscribed { parcel_id: parcel }))
    }

    fn handle_unsubscribe(&mut self, parcel_id: Option<ParcelId>) -> Option<ServerMessage> {
        let parcel = parcel_id?;
        // Leaving needs no access check and always succeeds.
        self.shared.registry.leave(&self.conn, &GroupKey::Parcel(parcel.clone()));
        Some(ServerMessage::Unsubscribed { parcel_id: parcel })
    }

    /// `Open → Closed`: releases all group memberships atomically.
    /// Idempotent; closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let released = self.shared.registry.disconnect(&self.conn);
        info!(connection = %self.conn, user = %self.user, released, "Tracking session closed");
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        // Teardown safety net for transport paths that never reached close().
        self.close();
    }
}
