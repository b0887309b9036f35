//! Event Store (C2, spec.md §4.2): owns the set of events and their mutable attributes, and
//! enforces lifecycle transitions and modification rules. Registration data (confirmed list,
//! waitlist) is owned separately by [`crate::registration::RegistrationStore`] (C3); operations
//! here that need facts about registrations (current head-count, whether the waitlist is
//! non-empty) take them as parameters supplied by the orchestrator (C7), which is the only layer
//! that holds both stores.

use crate::error::{OpError, OpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A single scheduled meetup. Field names and JSON casing match the on-disk schema in
/// spec.md §6.1 (`google_maps_link`, `event_datetime`, `event_deadline`, ...); serialization
/// happens in [`crate::persistence`] rather than via `#[derive(Serialize)]` directly on this
/// type, since the persistence layer also needs to apply the timezone and schema-migration rules
/// of spec.md §4.1 that a plain derive can't express.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub venue: String,
    pub address: String,
    pub maps_link: String,
    pub start_time: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub channel_id: Option<u64>,
    pub thread_id: Option<u64>,
    pub message_id: Option<u64>,
    pub open: bool,
    pub archived: bool,
    pub drinks: Vec<String>,
    pub max_capacity: Option<u32>,
    pub creator_id: Option<u64>,
    pub closed_attendance_count: Option<u32>,
    pub ping_role_id: Option<u64>,
    pub role_id: Option<u64>,
}

impl Event {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map_or(false, |d| now > d)
    }

    pub fn has_drinks(&self) -> bool {
        !self.drinks.is_empty()
    }

    fn fold(name: &str) -> String {
        name.to_lowercase()
    }
}

/// Fields accepted when creating a new event. `deadline` must be strictly before `start_time`
/// (I5); validated in [`EventStore::add`].
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub venue: String,
    pub address: String,
    pub maps_link: String,
    pub start_time: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub channel_id: Option<u64>,
    pub thread_id: Option<u64>,
    pub drinks: Vec<String>,
    pub max_capacity: Option<u32>,
    pub creator_id: Option<u64>,
    pub ping_role_id: Option<u64>,
    pub role_id: Option<u64>,
}

/// A partial modification to an event's mutable fields (spec.md §4.2 `update`). `None` means
/// "leave unchanged"; `Some(None)` for `deadline` means "clear the deadline".
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub venue: Option<String>,
    pub address: Option<String>,
    pub maps_link: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub drinks: Option<Vec<String>>,
    pub max_capacity: Option<Option<u32>>,
}

impl EventPatch {
    fn is_noop(&self, event: &Event) -> bool {
        let same_drinks = self.drinks.as_ref().map_or(true, |d| {
            use std::collections::HashSet;
            let a: HashSet<&str> = d.iter().map(String::as_str).collect();
            let b: HashSet<&str> = event.drinks.iter().map(String::as_str).collect();
            a == b
        });
        self.venue.as_ref().map_or(true, |v| v == &event.venue)
            && self.address.as_ref().map_or(true, |a| a == &event.address)
            && self
                .maps_link
                .as_ref()
                .map_or(true, |m| m == &event.maps_link)
            && self
                .start_time
                .map_or(true, |t| t == event.start_time)
            && self.deadline.map_or(true, |d| d == event.deadline)
            && same_drinks
            && self
                .max_capacity
                .map_or(true, |c| c == event.max_capacity)
    }
}

#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<String, Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut store = Self::new();
        for event in events {
            store.events.insert(Event::fold(&event.name), event);
        }
        store
    }

    pub fn all(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Case-insensitive lookup (I1).
    pub fn get(&self, name: &str) -> OpResult<&Event> {
        self.events
            .get(&Event::fold(name))
            .ok_or_else(|| OpError::EventNotFound(name.to_owned()))
    }

    fn get_mut(&mut self, name: &str) -> OpResult<&mut Event> {
        self.events
            .get_mut(&Event::fold(name))
            .ok_or_else(|| OpError::EventNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(&Event::fold(name))
    }

    /// Appends a new event to the cache. Does not persist on its own (spec.md §4.2); the
    /// orchestrator is responsible for calling into `crate::persistence` afterwards. `now` is
    /// supplied by the orchestrator's clock (spec.md §9 "Clock boundary") and used to enforce
    /// spec.md §4.7's "validate timestamps (future, deadline < start)" rule on creation.
    pub fn add(&mut self, fields: NewEvent, now: DateTime<Utc>) -> OpResult<&Event> {
        if self.contains(&fields.name) {
            warn!(event = %fields.name, "rejected create: duplicate event name");
            return Err(OpError::EventDuplicate(fields.name));
        }
        if fields.start_time <= now {
            warn!(event = %fields.name, "rejected create: start time is in the past");
            return Err(OpError::DateTimeInPast(fields.name));
        }
        if let Some(deadline) = fields.deadline {
            if deadline <= now {
                warn!(event = %fields.name, "rejected create: deadline is in the past");
                return Err(OpError::DeadlineInPast(fields.name));
            }
            if deadline >= fields.start_time {
                warn!(event = %fields.name, "rejected create: deadline is not before start time");
                return Err(OpError::DeadlineAfterEvent(fields.name));
            }
        }
        debug!(event = %fields.name, "creating event");

        let event = Event {
            name: fields.name.clone(),
            venue: fields.venue,
            address: fields.address,
            maps_link: fields.maps_link,
            start_time: fields.start_time,
            deadline: fields.deadline,
            channel_id: fields.channel_id,
            thread_id: fields.thread_id,
            message_id: None,
            open: true,
            archived: false,
            drinks: fields.drinks,
            max_capacity: fields.max_capacity,
            creator_id: fields.creator_id,
            closed_attendance_count: None,
            ping_role_id: fields.ping_role_id,
            role_id: fields.role_id,
        };
        let key = Event::fold(&event.name);
        self.events.insert(key.clone(), event);
        Ok(self.events.get(&key).unwrap())
    }

    pub fn set_message_id(&mut self, name: &str, message_id: u64) -> OpResult<()> {
        self.get_mut(name)?.message_id = Some(message_id);
        debug!(event = %name, message_id, "recorded announcement message id");
        Ok(())
    }

    /// Applies `patch` to the named event. All validation completes before any field is mutated
    /// (spec.md §4.2). `current_head_count` and `waitlist_non_empty` are supplied by the
    /// orchestrator from the registration store, since this store doesn't hold bucket data; `now`
    /// is the orchestrator's clock, used to reject a newly-set start time or deadline that's
    /// already in the past (spec.md §9 "Clock boundary").
    pub fn update(
        &mut self,
        name: &str,
        patch: EventPatch,
        current_head_count: u32,
        waitlist_non_empty: bool,
        now: DateTime<Utc>,
    ) -> OpResult<&Event> {
        let event = self.get(name)?;
        if event.archived {
            warn!(event = %event.name, "rejected update: event is archived");
            return Err(OpError::Archived(event.name.clone()));
        }
        if patch.is_noop(event) {
            warn!(event = %event.name, "rejected update: patch is a no-op");
            return Err(OpError::NoChanges(event.name.clone()));
        }

        let new_start_time = patch.start_time.unwrap_or(event.start_time);
        let new_deadline = patch.deadline.unwrap_or(event.deadline);
        if patch.start_time.is_some() && new_start_time <= now {
            warn!(event = %event.name, "rejected update: new start time is in the past");
            return Err(OpError::DateTimeInPast(event.name.clone()));
        }
        if let Some(deadline) = new_deadline {
            if patch.deadline.is_some() && deadline <= now {
                warn!(event = %event.name, "rejected update: new deadline is in the past");
                return Err(OpError::DeadlineInPast(event.name.clone()));
            }
            if deadline >= new_start_time {
                warn!(event = %event.name, "rejected update: deadline is not before start time");
                return Err(OpError::DeadlineAfterEvent(event.name.clone()));
            }
        }

        if let Some(Some(new_cap)) = patch.max_capacity {
            if let Some(old_cap) = event.max_capacity {
                if new_cap < old_cap {
                    if new_cap < current_head_count {
                        warn!(event = %event.name, "rejected update: new capacity is below current head count");
                        return Err(OpError::CapacityBelowCurrent(event.name.clone()));
                    }
                    if waitlist_non_empty {
                        warn!(event = %event.name, "rejected update: can't raise capacity cap while waitlist is non-empty");
                        return Err(OpError::CapacityWithWaitlist(event.name.clone()));
                    }
                }
            }
        }

        debug!(event = %event.name, "updating event");
        // All validation passed; now mutate.
        let event = self.get_mut(name)?;
        if let Some(venue) = patch.venue {
            event.venue = venue;
        }
        if let Some(address) = patch.address {
            event.address = address;
        }
        if let Some(maps_link) = patch.maps_link {
            event.maps_link = maps_link;
        }
        if let Some(start_time) = patch.start_time {
            event.start_time = start_time;
        }
        if let Some(deadline) = patch.deadline {
            event.deadline = deadline;
        }
        if let Some(drinks) = patch.drinks {
            event.drinks = drinks;
        }
        if let Some(max_capacity) = patch.max_capacity {
            event.max_capacity = max_capacity;
        }
        Ok(self.get(name)?)
    }

    /// Open/close transition (spec.md §3.3, §4.2). `head_count` is only consulted when closing.
    pub fn set_open_status(&mut self, name: &str, open: bool, head_count: u32) -> OpResult<&Event> {
        let event = self.get_mut(name)?;
        if event.archived {
            warn!(event = %event.name, "rejected status change: event is archived");
            return Err(OpError::Archived(event.name.clone()));
        }
        if open && event.open {
            warn!(event = %event.name, "rejected status change: event is already open");
            return Err(OpError::AlreadyOpen(event.name.clone()));
        }
        if !open && !event.open {
            warn!(event = %event.name, "rejected status change: event is already closed");
            return Err(OpError::AlreadyClosed(event.name.clone()));
        }

        event.open = open;
        if open {
            event.closed_attendance_count = None;
        } else {
            event.closed_attendance_count = Some(head_count);
        }
        debug!(event = %event.name, open, "changed event open status");
        Ok(self.get(name)?)
    }

    pub fn archive(&mut self, name: &str) -> OpResult<&Event> {
        let event = self.get_mut(name)?;
        if event.archived {
            warn!(event = %event.name, "rejected archive: event is already archived");
            return Err(OpError::AlreadyArchived(event.name.clone()));
        }
        event.archived = true;
        event.open = false;
        debug!(event = %event.name, "archived event");
        Ok(self.get(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2029, 1, 1, 0, 0, 0).unwrap()
    }

    fn new_event(name: &str) -> NewEvent {
        NewEvent {
            name: name.to_owned(),
            venue: "venue".into(),
            address: "addr".into(),
            maps_link: "link".into(),
            start_time: t(20),
            deadline: Some(t(10)),
            channel_id: None,
            thread_id: None,
            drinks: vec![],
            max_capacity: Some(10),
            creator_id: Some(1),
            ping_role_id: None,
            role_id: None,
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut store = EventStore::new();
        store.add(new_event("Summer Meetup"), now()).unwrap();
        assert_eq!(store.get("summer meetup").unwrap().name, "Summer Meetup");
        assert_eq!(store.get("SUMMER MEETUP").unwrap().name, "Summer Meetup");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();
        assert_matches!(
            store.add(new_event("meetup"), now()),
            Err(OpError::EventDuplicate(_))
        );
    }

    #[test]
    fn test_deadline_after_start_rejected() {
        let mut store = EventStore::new();
        let mut fields = new_event("Meetup");
        fields.deadline = Some(t(25));
        assert_matches!(store.add(fields, now()), Err(OpError::DeadlineAfterEvent(_)));
    }

    #[test]
    fn test_start_time_in_past_rejected() {
        let mut store = EventStore::new();
        let mut fields = new_event("Meetup");
        fields.start_time = now() - chrono::Duration::days(1);
        fields.deadline = None;
        assert_matches!(store.add(fields, now()), Err(OpError::DateTimeInPast(_)));
    }

    #[test]
    fn test_deadline_in_past_rejected() {
        let mut store = EventStore::new();
        let mut fields = new_event("Meetup");
        fields.deadline = Some(now() - chrono::Duration::days(1));
        assert_matches!(store.add(fields, now()), Err(OpError::DeadlineInPast(_)));
    }

    #[test]
    fn test_update_rejects_start_time_moved_into_the_past() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();
        let patch = EventPatch {
            start_time: Some(now() - chrono::Duration::days(1)),
            ..Default::default()
        };
        assert_matches!(
            store.update("Meetup", patch, 0, false, now()),
            Err(OpError::DateTimeInPast(_))
        );
    }

    #[test]
    fn test_archive_forces_closed_and_is_terminal() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();
        let event = store.archive("Meetup").unwrap();
        assert!(event.archived);
        assert!(!event.open);
        assert_matches!(store.archive("Meetup"), Err(OpError::AlreadyArchived(_)));
    }

    #[test]
    fn test_update_noop_rejected() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();
        let patch = EventPatch::default();
        assert_matches!(
            store.update("Meetup", patch, 0, false, now()),
            Err(OpError::NoChanges(_))
        );
    }

    #[test]
    fn test_update_drinks_compared_as_set() {
        let mut store = EventStore::new();
        let mut fields = new_event("Meetup");
        fields.drinks = vec!["beer".into(), "wine".into()];
        store.add(fields, now()).unwrap();

        let patch = EventPatch {
            drinks: Some(vec!["wine".into(), "beer".into()]),
            ..Default::default()
        };
        assert_matches!(
            store.update("Meetup", patch, 0, false, now()),
            Err(OpError::NoChanges(_))
        );
    }

    #[test]
    fn test_capacity_reduction_rejections() {
        let mut store = EventStore::new();
        let mut fields = new_event("Meetup");
        fields.max_capacity = Some(50);
        store.add(fields, now()).unwrap();

        let patch = EventPatch {
            max_capacity: Some(Some(20)),
            ..Default::default()
        };
        assert_matches!(
            store.update("Meetup", patch, 30, true, now()),
            Err(OpError::CapacityBelowCurrent(_))
        );

        let patch = EventPatch {
            max_capacity: Some(Some(40)),
            ..Default::default()
        };
        assert_matches!(
            store.update("Meetup", patch, 30, true, now()),
            Err(OpError::CapacityWithWaitlist(_))
        );

        let patch = EventPatch {
            max_capacity: Some(Some(40)),
            ..Default::default()
        };
        assert!(store.update("Meetup", patch, 30, false, now()).is_ok());
    }

    #[test]
    fn test_close_records_attendance_then_reopen_clears_it() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();

        let event = store.set_open_status("Meetup", false, 30).unwrap();
        assert!(!event.open);
        assert_eq!(event.closed_attendance_count, Some(30));
        assert_matches!(
            store.set_open_status("Meetup", false, 30),
            Err(OpError::AlreadyClosed(_))
        );

        let event = store.set_open_status("Meetup", true, 0).unwrap();
        assert!(event.open);
        assert_eq!(event.closed_attendance_count, None);
    }

    #[test]
    fn test_archived_event_rejects_update_and_status_change() {
        let mut store = EventStore::new();
        store.add(new_event("Meetup"), now()).unwrap();
        store.archive("Meetup").unwrap();

        assert_matches!(
            store.update("Meetup", EventPatch::default(), 0, false, now()),
            Err(OpError::Archived(_))
        );
        assert_matches!(
            store.set_open_status("Meetup", true, 0),
            Err(OpError::Archived(_))
        );
    }
}
