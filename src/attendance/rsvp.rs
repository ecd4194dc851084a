//! RSVP state machine.
//!
//! Owns the per-(event, person) attendance response, the late-cancellation
//! confirmation protocol, and slot consumption/release on transitions. The
//! RSVP itself is a flat `yes`/`no`/`maybe`; "late cancellation" is a flag
//! recorded alongside, not a distinct state.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::AttendanceError;
use super::quota::QuotaLedger;
use super::storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};
use crate::directory::{MemberDirectory, NotificationSink, TeamAssignments};
use crate::error::Result;
use crate::model::{EventId, PersonId, Rsvp, RsvpResponse};

/// An incoming attendance response.
#[derive(Debug, Clone, Deserialize)]
pub struct RsvpRequest {
    pub response: RsvpResponse,
    #[serde(default)]
    pub note: Option<String>,
    /// Explicit acknowledgement of a penalized late cancellation.
    #[serde(default)]
    pub confirm_late_cancel: bool,
}

impl RsvpRequest {
    #[must_use]
    pub fn new(response: RsvpResponse) -> Self {
        Self {
            response,
            note: None,
            confirm_late_cancel: false,
        }
    }

    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.confirm_late_cancel = true;
        self
    }
}

/// Result of submitting a response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RsvpOutcome {
    /// The response was committed.
    Committed {
        rsvp: Rsvp,
        /// Whether a subscription slot is held for this event afterwards.
        slot_consumed: bool,
    },
    /// Declining would be a late cancellation; the caller must resubmit
    /// with `confirm_late_cancel` to proceed. Nothing was written.
    ConfirmationRequired { team: String },
}

/// The RSVP state machine.
///
/// Generic over the storage and collaborator traits; all durable state
/// lives behind them.
pub struct RsvpEngine<S, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    store: S,
    directory: D,
    teams: T,
    notifier: N,
    quota: QuotaLedger<S>,
}

impl<S, D, T, N> RsvpEngine<S, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    #[must_use]
    pub fn new(store: S, directory: D, teams: T, notifier: N) -> Self {
        let quota = QuotaLedger::new(store.clone());
        Self {
            store,
            directory,
            teams,
            notifier,
            quota,
        }
    }

    /// Submit a response for (event, person).
    ///
    /// Transitions between `yes`, `no` and `maybe` are free except the
    /// guarded decline: moving away from `yes` while a team assignment
    /// exists requires explicit confirmation, returned synchronously as
    /// [`RsvpOutcome::ConfirmationRequired`] with no state change.
    ///
    /// # Errors
    ///
    /// Refused entirely (no partial writes) if the event is unknown or the
    /// person is not an active member of its club.
    pub async fn submit(
        &self,
        person_id: PersonId,
        event_id: EventId,
        request: RsvpRequest,
    ) -> Result<RsvpOutcome> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(AttendanceError::EventNotFound { event_id })?;

        if !self
            .directory
            .is_active_member(event.club_id, person_id)
            .await?
        {
            return Err(AttendanceError::NotClubMember {
                person_id,
                club_id: event.club_id,
            }
            .into());
        }

        let current = self.store.get_rsvp(event_id, person_id).await?;
        let was_yes = current.as_ref().is_some_and(|r| r.response == RsvpResponse::Yes);
        let leaving_yes = was_yes && request.response != RsvpResponse::Yes;

        // Guarded decline: a team assignment turns this into a penalized
        // late cancellation that needs an explicit confirmation round-trip.
        let mut guarded_team = None;
        if leaving_yes {
            guarded_team = self.teams.team_for(event_id, person_id).await?;
            if let Some(team) = &guarded_team {
                if !request.confirm_late_cancel {
                    return Ok(RsvpOutcome::ConfirmationRequired { team: team.clone() });
                }
            }
        }

        let cancelled_late = match request.response {
            RsvpResponse::Yes => Some(false),
            _ if leaving_yes && guarded_team.is_some() => Some(true),
            _ => current.as_ref().and_then(|r| r.cancelled_late),
        };

        let rsvp = Rsvp {
            event_id,
            person_id,
            response: request.response,
            responded_at: Utc::now(),
            note: request.note,
            cancelled_late,
        };

        let subscription = if event.is_quota_eligible() {
            self.store
                .current_subscription(event.club_id, person_id)
                .await?
        } else {
            None
        };

        // A held slot must always have a matching `yes` on record: the
        // release happens before the write, the consume only after it. A
        // failure on either side leaves at worst a `yes` without a slot,
        // never a stranded slot.
        if leaving_yes {
            if let Some(sub) = &subscription {
                self.quota.release(sub.id, event.id).await?;
            }
        }

        self.store.upsert_rsvp(&rsvp).await?;

        let slot_consumed = match &subscription {
            Some(sub) if request.response == RsvpResponse::Yes => {
                if was_yes {
                    // Resubmitted `yes`: report the slot, never take another
                    self.quota.holds_slot(sub.id, event.id).await?
                } else {
                    self.quota.try_consume(sub, &event).await?
                }
            }
            _ => false,
        };

        tracing::debug!(
            target: "rollcall::attendance::rsvp",
            %event_id,
            %person_id,
            response = %request.response,
            slot_consumed,
            cancelled_late = ?rsvp.cancelled_late,
            "rsvp committed"
        );

        self.notifier
            .rsvp_changed(event_id, person_id, request.response)
            .await;

        Ok(RsvpOutcome::Committed { rsvp, slot_consumed })
    }
}
