//! Capacity & Admission (C4, spec.md §4.4): pure decision functions, no I/O and no mutation.
//! The orchestrator calls these to decide where a prospective registration lands, then applies
//! the result through [`crate::registration::RegistrationStore`].

use crate::event::Event;
use chrono::{DateTime, Utc};

/// Remaining confirmed-list capacity. `None` is `max_capacity == None` (unlimited).
pub fn remaining(event: &Event, head_count: u32) -> Option<u32> {
    event
        .max_capacity
        .map(|cap| cap.saturating_sub(head_count))
}

/// Spec.md §4.4: archived, closed, or past-deadline events block *confirmation* but still
/// accept waitlist joins (the external UI is assumed to only expose a "join waitlist" control
/// in that state).
pub fn blocked(event: &Event, now: DateTime<Utc>) -> bool {
    event.archived || !event.open || event.is_past_deadline(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Confirm,
    /// `group_too_large` is set when the party didn't fit remaining capacity (as opposed to
    /// capacity being fully exhausted, or the event being blocked) — distinguishes the "group
    /// too large" notice spec.md §4.4 calls for.
    Waitlist { group_too_large: bool },
}

/// Decides whether a prospective registration of `party_size` should be confirmed or
/// waitlisted, per the table in spec.md §4.4.
pub fn decide_admission(event: &Event, head_count: u32, party_size: u32, now: DateTime<Utc>) -> AdmissionDecision {
    if blocked(event, now) {
        return AdmissionDecision::Waitlist {
            group_too_large: false,
        };
    }

    match remaining(event, head_count) {
        None => AdmissionDecision::Confirm,
        Some(0) => AdmissionDecision::Waitlist {
            group_too_large: false,
        },
        Some(r) if party_size > r => AdmissionDecision::Waitlist {
            group_too_large: true,
        },
        Some(_) => AdmissionDecision::Confirm,
    }
}

/// True exactly on the transition where a confirm brought `head_count` to precisely
/// `max_capacity` (spec.md §4.4's "capacity reached" notification, fired only once by
/// construction since it's an equality check on a monotonically-confirmed head count).
pub fn capacity_just_reached(event: &Event, head_count_before: u32, head_count_after: u32) -> bool {
    match event.max_capacity {
        Some(cap) => head_count_before < cap && head_count_after == cap,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event() -> Event {
        Event {
            name: "Meetup".into(),
            venue: "".into(),
            address: "".into(),
            maps_link: "".into(),
            start_time: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            deadline: None,
            channel_id: None,
            thread_id: None,
            message_id: None,
            open: true,
            archived: false,
            drinks: vec![],
            max_capacity: Some(4),
            creator_id: None,
            closed_attendance_count: None,
            ping_role_id: None,
            role_id: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_confirms_when_room() {
        let event = base_event();
        assert_eq!(
            decide_admission(&event, 0, 2, now()),
            AdmissionDecision::Confirm
        );
    }

    #[test]
    fn test_waitlist_group_too_large() {
        let event = base_event();
        assert_eq!(
            decide_admission(&event, 2, 3, now()),
            AdmissionDecision::Waitlist {
                group_too_large: true
            }
        );
    }

    #[test]
    fn test_waitlist_when_full() {
        let event = base_event();
        assert_eq!(
            decide_admission(&event, 4, 1, now()),
            AdmissionDecision::Waitlist {
                group_too_large: false
            }
        );
    }

    #[test]
    fn test_blocked_event_waitlists_even_with_room() {
        let mut event = base_event();
        event.open = false;
        assert_eq!(
            decide_admission(&event, 0, 1, now()),
            AdmissionDecision::Waitlist {
                group_too_large: false
            }
        );
    }

    #[test]
    fn test_unlimited_capacity_always_confirms_when_not_blocked() {
        let mut event = base_event();
        event.max_capacity = None;
        assert_eq!(
            decide_admission(&event, 1000, 6, now()),
            AdmissionDecision::Confirm
        );
    }

    #[test]
    fn test_capacity_reached_fires_once_on_exact_transition() {
        let event = base_event(); // max_capacity = 4
        assert!(capacity_just_reached(&event, 2, 4));
        assert!(!capacity_just_reached(&event, 4, 4));
        assert!(!capacity_just_reached(&event, 3, 5));
    }
}
