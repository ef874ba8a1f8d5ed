use crate::error::TrackingError;
use courier_database::Database;
use courier_domain::{LocationPoint, ParcelId, UserId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug)]
struct LocationWrite {
    driver: UserId,
    parcel: Option<ParcelId>,
    point: LocationPoint,
}

/// Durable, best-effort persistence of location samples.
///
/// Writes go through a bounded queue drained by a dedicated task, keeping
/// storage latency off the message-handling path. A full queue or a failed
/// write costs one sample, never the connection: tracking stays live while
/// durability is degraded.
#[derive(Debug, Clone)]
pub struct LocationRecorder {
    queue: mpsc::Sender<LocationWrite>,
}

impl LocationRecorder {
    /// Spawns the writer task and returns the queue handle.
    ///
    /// The task stops once every handle is dropped and the queue drains.
    #[must_use]
    pub fn spawn(database: Database, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LocationWrite>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) =
                    database.insert_location(&write.driver, write.parcel.as_ref(), &write.point).await
                {
                    let err = TrackingError::Persistence {
                        message: e.to_string().into(),
                        context: Some("location sample".into()),
                    };
                    warn!(driver = %write.driver, error = %err, "Failed to persist location sample");
                }
            }
            debug!("Location writer drained and stopped");
        });

        Self { queue: tx }
    }

    /// Queues one sample for persistence.
    ///
    /// Non-blocking: a full queue drops the sample with a warning instead of
    /// stalling message handling.
    pub fn record(&self, driver: UserId, parcel: Option<ParcelId>, point: LocationPoint) {
        match self.queue.try_send(LocationWrite { driver, parcel, point }) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(write)) => {
                warn!(driver = %write.driver, "Location write queue full; dropping sample");
            },
            Err(mpsc::error::TrySendError::Closed(write)) => {
                warn!(driver = %write.driver, "Location writer stopped; dropping sample");
            },
        }
    }
}
