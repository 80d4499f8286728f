//! Pre-configured rooms and identities.

use common::secret::SecretString;
use common::ParticipantId;
use signaling_service::actors::{ActorMetrics, RoomActorHandle, RoomControllerActorHandle};
use signaling_service::config::RoomSettings;
use signaling_service::identity::HmacIdentityVerifier;
use signaling_service::protocol::RoomSnapshot;
use std::time::Duration;

/// Secret shared by `test_verifier` and `mint_token`.
pub const TEST_IDENTITY_SECRET: &str = "signaling-test-secret";

/// Shorthand for building participant ids.
#[must_use]
pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

/// Verifier keyed with `TEST_IDENTITY_SECRET`.
#[must_use]
pub fn test_verifier() -> HmacIdentityVerifier {
    HmacIdentityVerifier::new(&SecretString::from(TEST_IDENTITY_SECRET))
}

/// Identity token that `test_verifier` accepts for `id`.
#[must_use]
pub fn mint_token(id: &str) -> String {
    test_verifier().issue(&pid(id))
}

/// Builder for a room running under its own room directory.
#[derive(Debug, Clone)]
pub struct TestRoom {
    host: ParticipantId,
    host_display_name: Option<String>,
    title: Option<String>,
    settings: RoomSettings,
    max_rooms: usize,
}

impl TestRoom {
    /// Room hosted by `host`, default settings.
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            host: pid(host),
            host_display_name: None,
            title: Some("Test Room".to_string()),
            settings: RoomSettings::default(),
            max_rooms: 16,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_host_display_name(mut self, name: impl Into<String>) -> Self {
        self.host_display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.settings.capacity = capacity;
        self
    }

    /// Heartbeat cadence; the timeout is `interval * multiplier`.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, multiplier: u32) -> Self {
        self.settings.heartbeat_interval = interval;
        self.settings.heartbeat_timeout_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.settings.reconnect_grace_period = grace;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.settings.renegotiation_debounce = debounce;
        self
    }

    /// Settings the room will run with.
    #[must_use]
    pub fn settings(&self) -> RoomSettings {
        self.settings
    }

    /// Start a directory, create the room and resolve its worker.
    ///
    /// # Panics
    ///
    /// Panics if the directory refuses the room.
    pub async fn start(self) -> StartedRoom {
        let controller = RoomControllerActorHandle::new(
            "sig-test".to_string(),
            self.max_rooms,
            self.settings,
            ActorMetrics::new(),
        );
        let snapshot = controller
            .create_room(self.host, self.host_display_name, self.title)
            .await
            .expect("room creation should succeed");
        let room = controller
            .get_room_handle(snapshot.room_id.clone())
            .await
            .expect("freshly created room should be resolvable");

        StartedRoom {
            controller,
            room,
            snapshot,
        }
    }
}

/// A running room and the directory that owns it.
#[derive(Debug)]
pub struct StartedRoom {
    pub controller: RoomControllerActorHandle,
    pub room: RoomActorHandle,
    /// Snapshot taken at creation.
    pub snapshot: RoomSnapshot,
}

impl StartedRoom {
    /// Cancel the directory and every room under it.
    pub fn stop(&self) {
        self.controller.cancel();
    }
}

impl Drop for StartedRoom {
    fn drop(&mut self) {
        self.controller.cancel();
    }
}
