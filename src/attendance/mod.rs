//! Attendance: RSVPs, weekly quota accounting, and the composed
//! availability view.

pub mod availability;
pub mod error;
pub mod quota;
pub mod rsvp;
pub mod storage;

pub use availability::{
    availability, AvailabilityAggregator, EventAvailability, EventSnapshot, ResponseCounts,
    SubscriptionSnapshot, SubscriptionSummary,
};
pub use error::AttendanceError;
pub use quota::{week_start, QuotaLedger};
pub use rsvp::{RsvpEngine, RsvpOutcome, RsvpRequest};
pub use storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};

#[cfg(any(test, feature = "test-stores"))]
pub use storage::test::InMemoryClubStore;
