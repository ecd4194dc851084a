//! External collaborator interfaces.
//!
//! The engine trusts these answers and performs no authentication or
//! role checking itself.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ClubId, EventId, Membership, PersonId, RsvpResponse};

/// Resolves club membership for a person.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Look up the membership relation, if any.
    async fn membership(&self, club_id: ClubId, person_id: PersonId)
        -> Result<Option<Membership>>;

    /// Whether the person is an active member of the club.
    async fn is_active_member(&self, club_id: ClubId, person_id: PersonId) -> Result<bool> {
        Ok(self
            .membership(club_id, person_id)
            .await?
            .is_some_and(|m| m.is_active()))
    }
}

/// Resolves team assignments, used only to decide whether declining
/// attendance needs explicit confirmation.
#[async_trait]
pub trait TeamAssignments: Send + Sync {
    /// The team the person is assigned to for this event, if any.
    async fn team_for(&self, event_id: EventId, person_id: PersonId) -> Result<Option<String>>;
}

/// Fire-and-forget notification dispatch.
///
/// Implementations must never fail the calling operation; delivery
/// problems are their own concern.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn rsvp_changed(&self, event_id: EventId, person_id: PersonId, response: RsvpResponse);

    async fn payment_completed(&self, event_id: EventId, person_id: PersonId);
}

/// Notification sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotificationSink;

#[async_trait]
impl NotificationSink for NoOpNotificationSink {
    async fn rsvp_changed(&self, _event_id: EventId, _person_id: PersonId, _response: RsvpResponse) {}

    async fn payment_completed(&self, _event_id: EventId, _person_id: PersonId) {}
}

/// Notification sink that logs via tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn rsvp_changed(&self, event_id: EventId, person_id: PersonId, response: RsvpResponse) {
        tracing::info!(
            target: "rollcall::notifications",
            %event_id,
            %person_id,
            %response,
            "rsvp changed"
        );
    }

    async fn payment_completed(&self, event_id: EventId, person_id: PersonId) {
        tracing::info!(
            target: "rollcall::notifications",
            %event_id,
            %person_id,
            "payment completed"
        );
    }
}

/// In-memory collaborators for testing.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory membership and team-assignment directory.
    #[derive(Default, Clone)]
    pub struct InMemoryDirectory {
        inner: Arc<InMemoryDirectoryInner>,
    }

    #[derive(Default)]
    struct InMemoryDirectoryInner {
        memberships: RwLock<HashMap<(ClubId, PersonId), Membership>>,
        teams: RwLock<HashMap<(EventId, PersonId), String>>,
    }

    impl InMemoryDirectory {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_membership(&self, membership: Membership) {
            self.inner
                .memberships
                .write()
                .unwrap()
                .insert((membership.club_id, membership.person_id), membership);
        }

        pub fn seed_team(&self, event_id: EventId, person_id: PersonId, team: impl Into<String>) {
            self.inner
                .teams
                .write()
                .unwrap()
                .insert((event_id, person_id), team.into());
        }
    }

    #[async_trait]
    impl MemberDirectory for InMemoryDirectory {
        async fn membership(
            &self,
            club_id: ClubId,
            person_id: PersonId,
        ) -> Result<Option<Membership>> {
            Ok(self
                .inner
                .memberships
                .read()
                .unwrap()
                .get(&(club_id, person_id))
                .cloned())
        }
    }

    #[async_trait]
    impl TeamAssignments for InMemoryDirectory {
        async fn team_for(&self, event_id: EventId, person_id: PersonId) -> Result<Option<String>> {
            Ok(self
                .inner
                .teams
                .read()
                .unwrap()
                .get(&(event_id, person_id))
                .cloned())
        }
    }
}
