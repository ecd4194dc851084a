//! Attendance-specific error types.

use std::fmt;

use crate::model::{ClubId, EventId, PersonId};

/// Errors raised by the RSVP state machine and availability read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    /// The event does not exist.
    EventNotFound { event_id: EventId },
    /// The caller is not an active member of the event's club.
    NotClubMember { person_id: PersonId, club_id: ClubId },
}

impl fmt::Display for AttendanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventNotFound { event_id } => {
                write!(f, "Event not found: {event_id}")
            }
            Self::NotClubMember { person_id, club_id } => {
                write!(
                    f,
                    "Person {person_id} is not an active member of club {club_id}"
                )
            }
        }
    }
}

impl std::error::Error for AttendanceError {}

impl From<AttendanceError> for crate::error::RollcallError {
    fn from(err: AttendanceError) -> Self {
        match &err {
            AttendanceError::EventNotFound { .. } => {
                crate::error::RollcallError::NotFound(err.to_string())
            }
            AttendanceError::NotClubMember { .. } => {
                crate::error::RollcallError::Forbidden(err.to_string())
            }
        }
    }
}
