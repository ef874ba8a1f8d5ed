//! End-to-end coverage of the tracking channel: handshake gating, message
//! dispatch, fan-out audiences, throttled persistence, and teardown.

use courier_database::Database;
use courier_domain::config::AppConfig;
use courier_domain::{Parcel, ParcelId, ParcelStatus, UserId};
use courier_sessions::GroupKey;
use courier_tracking::{
    COORDINATES_REQUIRED, INVALID_JSON, Mailbox, ONLY_DRIVERS_SEND, PARCEL_ACCESS_DENIED,
    ServerMessage, Tracking, TrackingError, TrackingRegistry,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use std::time::Duration;

const SECRET: &str = "test-secret";
const ISSUER: &str = "courierhub";

struct Harness {
    tracking: Tracking,
    registry: TrackingRegistry,
    db: Database,
}

async fn harness() -> Harness {
    let db = Database::builder()
        .url("mem://")
        .session("test_ns", "tracking")
        .init()
        .await
        .expect("connect to mem://");

    let mut config = AppConfig::default();
    config.security.jwt.secret = SECRET.to_owned();
    config.security.jwt.issuer = ISSUER.to_owned();

    let registry = TrackingRegistry::new();
    let tracking = courier_tracking::init(&config, &db, &registry).expect("init tracking");

    Harness { tracking, registry, db }
}

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    iss: &'a str,
    exp: i64,
}

fn token_for(user: &str) -> String {
    let claims =
        TestClaims { sub: user, iss: ISSUER, exp: chrono::Utc::now().timestamp() + 3600 };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
        .expect("encode token")
}

impl Harness {
    async fn seed_client(&self, user: &str) {
        self.db
            .create_client(&UserId::from(user), "Test Client", &format!("{user}@test.com"))
            .await
            .expect("seed client");
    }

    async fn seed_parcel(&self, parcel: &str, client: &str, status: ParcelStatus) {
        self.db
            .create_parcel(&Parcel {
                id: ParcelId::from(parcel),
                tracking_number: format!("TRK-{parcel}"),
                client: UserId::from(client),
                current_status: status,
            })
            .await
            .expect("seed parcel");
    }

    async fn seed_assignment(&self, driver: &str, parcel: &str) {
        self.db
            .assign_driver(&UserId::from(driver), &ParcelId::from(parcel))
            .await
            .expect("seed assignment");
    }
}

fn drain(mailbox: &mut Mailbox) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(event) = mailbox.try_recv() {
        out.push((*event).clone());
    }
    out
}

fn location_frame(lat: f64, lng: f64) -> String {
    format!(r#"{{"type":"location_update","lat":{lat},"lng":{lng}}}"#)
}

/// Lets the detached location writer drain its queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn unauthenticated_connect_is_refused() {
    let h = harness().await;

    let missing = h.tracking.connect(None, None).await;
    assert!(matches!(missing, Err(TrackingError::Authentication { .. })));

    let garbage = h.tracking.connect(Some("not-a-jwt"), None).await;
    assert!(matches!(garbage, Err(TrackingError::Authentication { .. })));

    assert_eq!(h.registry.connection_count(), 0, "no membership survives a refusal");
}

#[tokio::test]
async fn unknown_subject_is_refused() {
    let h = harness().await;

    // The token verifies, but nothing in the directory knows this subject.
    let result = h.tracking.connect(Some(&token_for("ghost")), None).await;
    assert!(matches!(result, Err(TrackingError::Authentication { .. })));
    assert_eq!(h.registry.connection_count(), 0);
}

#[tokio::test]
async fn connect_with_inaccessible_parcel_is_refused() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_client("C2").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;

    let result =
        h.tracking.connect(Some(&token_for("C2")), Some(ParcelId::from("P100"))).await;
    assert!(matches!(result, Err(TrackingError::Authorization { .. })));
    assert_eq!(h.registry.connection_count(), 0, "refusal rolls the registration back");
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 0);
}

#[tokio::test]
async fn connect_with_unknown_parcel_is_refused() {
    let h = harness().await;
    h.seed_client("C1").await;

    let result =
        h.tracking.connect(Some(&token_for("C1")), Some(ParcelId::from("nope"))).await;
    assert!(matches!(result, Err(TrackingError::Authorization { .. })));
}

#[tokio::test]
async fn driver_handshake_joins_driver_and_parcel_groups() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (session, _mailbox) = h
        .tracking
        .connect(Some(&token_for("D1")), Some(ParcelId::from("P100")))
        .await
        .expect("driver connects");

    assert!(session.is_driver());
    assert_eq!(h.registry.member_count(&GroupKey::Driver("D1".into())), 1);
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 1);
}

#[tokio::test]
async fn client_handshake_joins_parcel_group_only() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (session, _mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("client connects");

    assert!(!session.is_driver());
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 1);
    assert_eq!(h.registry.member_count(&GroupKey::Driver("C1".into())), 0);
}

#[tokio::test]
async fn driver_update_reaches_parcel_and_driver_groups_exactly_once() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (mut driver, mut driver_mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");
    let (_client, mut client_mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("client connects");

    let reply = driver.handle_text(&location_frame(12.9, 77.6)).await;
    assert_eq!(reply, None, "a valid update draws no direct reply");

    let to_client = drain(&mut client_mailbox);
    assert_eq!(to_client.len(), 1, "one broadcast per update on the parcel group");
    let ServerMessage::LocationUpdate { driver_id, location, parcel_id } = &to_client[0] else {
        panic!("expected a location_update broadcast");
    };
    assert_eq!(driver_id, &UserId::from("D1"));
    assert_eq!(parcel_id, &Some(ParcelId::from("P100")));
    assert!((location.lat - 12.9).abs() < f64::EPSILON);

    let to_driver = drain(&mut driver_mailbox);
    assert_eq!(to_driver.len(), 1, "one mirror broadcast on the driver group");
}

#[tokio::test]
async fn non_driver_update_yields_error_and_nothing_else() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;

    let (mut client, mut mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("client connects");

    let reply = client.handle_text(&location_frame(12.9, 77.6)).await;
    assert_eq!(reply, Some(ServerMessage::error(ONLY_DRIVERS_SEND)));

    assert!(drain(&mut mailbox).is_empty(), "no broadcast from a rejected update");
    settle().await;
    assert_eq!(h.db.location_count(&UserId::from("C1")).await.unwrap(), 0);
}

#[tokio::test]
async fn missing_coordinates_are_rejected_without_counting() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (mut driver, _mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");

    let reply = driver.handle_text(r#"{"type":"location_update","lat":12.9}"#).await;
    assert_eq!(reply, Some(ServerMessage::error(COORDINATES_REQUIRED)));
    assert_eq!(driver.update_count(), 0, "a rejected update is not an accepted update");

    // Zero is a position, not an absence.
    let reply = driver.handle_text(&location_frame(0.0, 0.0)).await;
    assert_eq!(reply, None);
    assert_eq!(driver.update_count(), 1);
}

#[tokio::test]
async fn every_fifth_accepted_update_is_persisted() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (mut driver, _mailbox) = h
        .tracking
        .connect(Some(&token_for("D1")), Some(ParcelId::from("P100")))
        .await
        .expect("driver connects");

    for i in 0..12 {
        let reply = driver.handle_text(&location_frame(12.9, 77.6 + f64::from(i))).await;
        assert_eq!(reply, None);
    }
    assert_eq!(driver.update_count(), 12);

    settle().await;
    // Updates 5 and 10 were sampled; 12 of them make exactly two rows.
    assert_eq!(h.db.location_count(&UserId::from("D1")).await.unwrap(), 2);
}

#[tokio::test]
async fn subscribe_checks_access_and_denial_does_not_join() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_client("C2").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (mut owner, mut owner_mailbox) =
        h.tracking.connect(Some(&token_for("C1")), None).await.expect("owner connects");
    let (mut outsider, mut outsider_mailbox) =
        h.tracking.connect(Some(&token_for("C2")), None).await.expect("outsider connects");

    let reply = owner.handle_text(r#"{"type":"subscribe_parcel","parcel_id":"P100"}"#).await;
    assert_eq!(reply, Some(ServerMessage::Subscribed { parcel_id: ParcelId::from("P100") }));

    let reply = outsider.handle_text(r#"{"type":"subscribe_parcel","parcel_id":"P100"}"#).await;
    assert_eq!(reply, Some(ServerMessage::error(PARCEL_ACCESS_DENIED)));
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 1);

    // The denied subscriber does not poison delivery to legitimate members.
    let (mut driver, _driver_mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");
    let reply = driver.handle_text(&location_frame(1.0, 2.0)).await;
    assert_eq!(reply, None);

    assert_eq!(drain(&mut owner_mailbox).len(), 1);
    assert!(drain(&mut outsider_mailbox).is_empty());
}

#[tokio::test]
async fn driver_subscribe_requires_their_own_assignment() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_parcel("P200", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;
    h.seed_assignment("D2", "P200").await;

    let (mut driver, _mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");

    // Being a driver is not enough; the assignment must be theirs.
    let reply = driver.handle_text(r#"{"type":"subscribe_parcel","parcel_id":"P200"}"#).await;
    assert_eq!(reply, Some(ServerMessage::error(PARCEL_ACCESS_DENIED)));

    let reply = driver.handle_text(r#"{"type":"subscribe_parcel","parcel_id":"P100"}"#).await;
    assert_eq!(reply, Some(ServerMessage::Subscribed { parcel_id: ParcelId::from("P100") }));
}

#[tokio::test]
async fn unsubscribe_always_succeeds() {
    let h = harness().await;
    h.seed_client("C1").await;

    let (mut client, _mailbox) =
        h.tracking.connect(Some(&token_for("C1")), None).await.expect("client connects");

    // Never joined, twice in a row: both replies confirm.
    for _ in 0..2 {
        let reply =
            client.handle_text(r#"{"type":"unsubscribe_parcel","parcel_id":"P404"}"#).await;
        assert_eq!(reply, Some(ServerMessage::Unsubscribed { parcel_id: ParcelId::from("P404") }));
    }

    // Without a parcel id the request is ignored.
    let reply = client.handle_text(r#"{"type":"unsubscribe_parcel"}"#).await;
    assert_eq!(reply, None);
}

#[tokio::test]
async fn close_releases_every_membership_and_stops_delivery() {
    let h = harness().await;
    h.seed_client("C1").await;
    for parcel in ["P1", "P2", "P3"] {
        h.seed_parcel(parcel, "C1", ParcelStatus::Assigned).await;
        h.seed_assignment("D1", parcel).await;
    }

    let (mut driver, mut mailbox) = h
        .tracking
        .connect(Some(&token_for("D1")), Some(ParcelId::from("P1")))
        .await
        .expect("driver connects");
    for parcel in ["P2", "P3"] {
        let frame = format!(r#"{{"type":"subscribe_parcel","parcel_id":"{parcel}"}}"#);
        assert!(matches!(
            driver.handle_text(&frame).await,
            Some(ServerMessage::Subscribed { .. })
        ));
    }

    // 1 driver group + 3 parcel groups.
    assert_eq!(h.registry.member_count(&GroupKey::Driver("D1".into())), 1);

    driver.close();
    driver.close(); // idempotent

    assert!(driver.is_closed());
    assert_eq!(h.registry.connection_count(), 0);
    for parcel in ["P1", "P2", "P3"] {
        assert_eq!(h.registry.member_count(&GroupKey::Parcel(parcel.into())), 0);
    }
    assert_eq!(h.registry.member_count(&GroupKey::Driver("D1".into())), 0);

    // No further broadcasts reach the closed session.
    assert_eq!(h.registry.publish(&GroupKey::Parcel("P1".into()), ServerMessage::error("x")), 0);
    assert!(mailbox.recv().await.is_none());

    // A closed session ignores frames entirely.
    assert_eq!(driver.handle_text(&location_frame(1.0, 1.0)).await, None);
}

#[tokio::test]
async fn malformed_payload_keeps_the_session_open() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;

    let (mut client, _mailbox) =
        h.tracking.connect(Some(&token_for("C1")), None).await.expect("client connects");

    let reply = client.handle_text("{not json").await;
    assert_eq!(reply, Some(ServerMessage::error(INVALID_JSON)));

    // A frame without a `type` discriminator is equally malformed.
    let reply = client.handle_text(r#"{"lat":1.0,"lng":2.0}"#).await;
    assert_eq!(reply, Some(ServerMessage::error(INVALID_JSON)));

    // The session is still perfectly usable.
    let reply = client.handle_text(r#"{"type":"subscribe_parcel","parcel_id":"P100"}"#).await;
    assert_eq!(reply, Some(ServerMessage::Subscribed { parcel_id: ParcelId::from("P100") }));
}

#[tokio::test]
async fn unknown_message_types_are_silently_ignored() {
    let h = harness().await;
    h.seed_client("C1").await;

    let (mut client, _mailbox) =
        h.tracking.connect(Some(&token_for("C1")), None).await.expect("client connects");

    assert_eq!(client.handle_text(r#"{"type":"ping"}"#).await, None);
    assert_eq!(client.handle_text(r#"{"type":"get_route","parcel_id":"P1"}"#).await, None);
}

#[tokio::test]
async fn completed_deliveries_drop_out_of_the_fanout_set() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::InTransit).await;
    h.seed_assignment("D1", "P100").await;

    let (_watcher, mut watcher_mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("watcher connects");
    let (mut driver, _driver_mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");

    assert_eq!(driver.handle_text(&location_frame(1.0, 1.0)).await, None);
    assert_eq!(drain(&mut watcher_mailbox).len(), 1);

    h.db.set_parcel_status(&ParcelId::from("P100"), ParcelStatus::Delivered).await.unwrap();

    // The assignment still exists, but the delivery is no longer in flight.
    assert_eq!(driver.handle_text(&location_frame(2.0, 2.0)).await, None);
    assert!(drain(&mut watcher_mailbox).is_empty());
}

#[tokio::test]
async fn explicit_parcel_target_reaches_unassigned_groups_too() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Delivered).await;
    h.seed_assignment("D1", "P100").await;

    // The parcel is out of the active set, but the owner still watches it.
    let (_watcher, mut watcher_mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("watcher connects");
    let (mut driver, _driver_mailbox) =
        h.tracking.connect(Some(&token_for("D1")), None).await.expect("driver connects");

    let frame = r#"{"type":"location_update","lat":3.0,"lng":4.0,"parcel_id":"P100"}"#;
    assert_eq!(driver.handle_text(frame).await, None);

    let received = drain(&mut watcher_mailbox);
    assert_eq!(received.len(), 1, "explicit target is broadcast even when inactive");
}

#[tokio::test]
async fn end_to_end_driver_and_client_share_the_fifth_sample() {
    let h = harness().await;
    h.seed_client("C1").await;
    h.seed_parcel("P100", "C1", ParcelStatus::Assigned).await;
    h.seed_assignment("D1", "P100").await;

    let (mut driver, mut driver_mailbox) = h
        .tracking
        .connect(Some(&token_for("D1")), Some(ParcelId::from("P100")))
        .await
        .expect("driver connects");
    assert!(driver.is_driver());
    assert_eq!(h.registry.member_count(&GroupKey::Driver("D1".into())), 1);
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 1);

    let (_client, mut client_mailbox) = h
        .tracking
        .connect(Some(&token_for("C1")), Some(ParcelId::from("P100")))
        .await
        .expect("client connects");
    assert_eq!(h.registry.member_count(&GroupKey::Parcel("P100".into())), 2);

    for _ in 0..5 {
        assert_eq!(driver.handle_text(&location_frame(12.9, 77.6)).await, None);
    }

    // The client saw all five parcel-group broadcasts with the coordinates.
    let to_client = drain(&mut client_mailbox);
    assert_eq!(to_client.len(), 5);
    for event in &to_client {
        let ServerMessage::LocationUpdate { driver_id, location, parcel_id } = event else {
            panic!("expected location_update");
        };
        assert_eq!(driver_id, &UserId::from("D1"));
        assert_eq!(parcel_id, &Some(ParcelId::from("P100")));
        assert!((location.lat - 12.9).abs() < f64::EPSILON);
        assert!((location.lng - 77.6).abs() < f64::EPSILON);
    }

    // The driver sits in both groups: one parcel copy and one mirror copy
    // per update, each carrying its own group's parcel context.
    let to_driver = drain(&mut driver_mailbox);
    assert_eq!(to_driver.len(), 10);

    // Exactly one sample was persisted, on the fifth update.
    settle().await;
    assert_eq!(h.db.location_count(&UserId::from("D1")).await.unwrap(), 1);
    let samples = h.db.recent_locations(&UserId::from("D1"), 10).await.unwrap();
    assert!((samples[0].latitude - 12.9).abs() < f64::EPSILON);
    assert!((samples[0].longitude - 77.6).abs() < f64::EPSILON);
    assert_eq!(samples[0].parcel.as_deref(), Some("P100"));
}
