//! Registration Store (C3, spec.md §4.3): per-event confirmed list (ordered) and FIFO waitlist,
//! enforcing the one-bucket-per-user invariant (I2).

use crate::error::{OpError, OpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A user's attendance record. Used both for confirmed attendees and waitlist entries — the two
/// are "structurally identical" per spec.md §3.1, so `WaitlistEntry` is a type alias rather than
/// a separate type; which bucket an entry lives in is purely a function of which `Vec` it's in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub user_id: u64,
    pub username: String,
    pub display_name: Option<String>,
    pub extra_people: u8,
    pub extras_names: Vec<String>,
    pub behavior_confirmed: bool,
    pub arrival_confirmed: bool,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    pub drinks: Vec<String>,
}

pub type WaitlistEntry = Attendee;

impl Attendee {
    /// Party size this entry occupies against capacity (`1 + extra_people`).
    pub fn party_size(&self) -> u32 {
        1 + self.extra_people as u32
    }

    /// Validates I7: `extras_names` length matches `extra_people`, and `drinks` length matches
    /// `1 + extra_people` when the event has drinks (else zero). Also enforces the 0-5 range on
    /// `extra_people` from spec.md §3.1.
    pub fn validate(&self, event_has_drinks: bool) -> OpResult<()> {
        if self.extra_people > 5 {
            return Err(OpError::ExtraPeopleOutOfRange(self.extra_people));
        }
        if self.extras_names.len() != self.extra_people as usize {
            return Err(OpError::ExtrasNamesMismatch(
                self.extras_names.len(),
                self.extra_people,
                self.event_name.clone(),
            ));
        }
        let expected_drinks = if event_has_drinks {
            self.party_size() as usize
        } else {
            0
        };
        if self.drinks.len() != expected_drinks {
            return Err(OpError::DrinksMismatch(
                self.drinks.len(),
                self.extra_people,
                self.event_name.clone(),
            ));
        }
        Ok(())
    }
}

/// Per-event pair of confirmed attendees and FIFO waitlist entries (spec.md §3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBucket {
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub waitlist: Vec<WaitlistEntry>,
}

impl EventBucket {
    pub fn head_count(&self) -> u32 {
        self.attendees.iter().map(Attendee::party_size).sum()
    }

    fn contains(&self, user_id: u64) -> bool {
        self.attendees.iter().any(|a| a.user_id == user_id)
            || self.waitlist.iter().any(|a| a.user_id == user_id)
    }
}

#[derive(Debug, Default)]
pub struct RegistrationStore {
    buckets: HashMap<String, EventBucket>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl RegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_buckets(buckets: HashMap<String, EventBucket>) -> Self {
        RegistrationStore { buckets }
    }

    pub fn buckets(&self) -> &HashMap<String, EventBucket> {
        &self.buckets
    }

    fn bucket(&self, event_name: &str) -> EventBucket {
        self.buckets.get(&fold(event_name)).cloned().unwrap_or_default()
    }

    fn bucket_mut(&mut self, event_name: &str) -> &mut EventBucket {
        self.buckets.entry(fold(event_name)).or_default()
    }

    pub fn head_count(&self, event_name: &str) -> u32 {
        self.bucket(event_name).head_count()
    }

    pub fn waitlist_len(&self, event_name: &str) -> usize {
        self.buckets
            .get(&fold(event_name))
            .map_or(0, |b| b.waitlist.len())
    }

    pub fn get_confirmed(&self, event_name: &str) -> &[Attendee] {
        static EMPTY: Vec<Attendee> = Vec::new();
        self.buckets
            .get(&fold(event_name))
            .map_or(EMPTY.as_slice(), |b| b.attendees.as_slice())
    }

    pub fn get_waitlist(&self, event_name: &str) -> &[WaitlistEntry] {
        static EMPTY: Vec<Attendee> = Vec::new();
        self.buckets
            .get(&fold(event_name))
            .map_or(EMPTY.as_slice(), |b| b.waitlist.as_slice())
    }

    pub fn add_confirmed(&mut self, event_name: &str, attendee: Attendee) -> OpResult<()> {
        let key = fold(event_name);
        let bucket = self.buckets.entry(key).or_default();
        if bucket.contains(attendee.user_id) {
            warn!(event = %event_name, user_id = attendee.user_id, "rejected add: user already holds a bucket slot");
            return Err(OpError::RegistrationDuplicate(
                attendee.user_id,
                event_name.to_owned(),
            ));
        }
        debug!(event = %event_name, user_id = attendee.user_id, "added confirmed attendee");
        bucket.attendees.push(attendee);
        Ok(())
    }

    pub fn add_waitlist(&mut self, event_name: &str, entry: WaitlistEntry) -> OpResult<()> {
        let key = fold(event_name);
        let bucket = self.buckets.entry(key).or_default();
        if bucket.contains(entry.user_id) {
            warn!(event = %event_name, user_id = entry.user_id, "rejected waitlist add: user already holds a bucket slot");
            return Err(OpError::RegistrationDuplicate(
                entry.user_id,
                event_name.to_owned(),
            ));
        }
        debug!(event = %event_name, user_id = entry.user_id, "added waitlist entry");
        bucket.waitlist.push(entry);
        Ok(())
    }

    pub fn remove_confirmed(&mut self, event_name: &str, user_id: u64) -> OpResult<Attendee> {
        let bucket = self.bucket_mut(event_name);
        let idx = bucket
            .attendees
            .iter()
            .position(|a| a.user_id == user_id)
            .ok_or_else(|| {
                warn!(event = %event_name, user_id, "rejected remove: user not in confirmed list");
                OpError::RegistrationNotFound(user_id, event_name.to_owned())
            })?;
        debug!(event = %event_name, user_id, "removed confirmed attendee");
        Ok(bucket.attendees.remove(idx))
    }

    pub fn remove_waitlist(&mut self, event_name: &str, user_id: u64) -> OpResult<WaitlistEntry> {
        let bucket = self.bucket_mut(event_name);
        let idx = bucket
            .waitlist
            .iter()
            .position(|a| a.user_id == user_id)
            .ok_or_else(|| {
                warn!(event = %event_name, user_id, "rejected remove: user not on waitlist");
                OpError::WaitlistNotFound(user_id, event_name.to_owned())
            })?;
        debug!(event = %event_name, user_id, "removed waitlist entry");
        Ok(bucket.waitlist.remove(idx))
    }

    /// Pops the head of the waitlist (FIFO), without inserting it into confirmed — the caller
    /// (the promotion engine) does that so it can apply capacity checks in between.
    pub fn promote_head(&mut self, event_name: &str) -> Option<WaitlistEntry> {
        let bucket = self.bucket_mut(event_name);
        if bucket.waitlist.is_empty() {
            None
        } else {
            let entry = bucket.waitlist.remove(0);
            debug!(event = %event_name, user_id = entry.user_id, "promoted head of waitlist");
            Some(entry)
        }
    }

    /// Removes a specific waitlist entry by user ID, bypassing FIFO order. Used for
    /// organizer-initiated manual promotion (spec.md §4.5).
    pub fn promote_specific(&mut self, event_name: &str, user_id: u64) -> OpResult<WaitlistEntry> {
        let entry = self.remove_waitlist(event_name, user_id)?;
        debug!(event = %event_name, user_id, "promoted specific waitlist entry");
        Ok(entry)
    }

    pub fn push_confirmed_preserving(&mut self, event_name: &str, attendee: Attendee) {
        self.bucket_mut(event_name).attendees.push(attendee);
    }
}
