//! Encoding & persistence (C1): translates between the in-memory [`EventStore`] /
//! [`RegistrationStore`] and the on-disk JSON files, including the legacy-format migrations and
//! the per-entry-tolerant error handling described for the data layer. Reading and writing the
//! files themselves (locking, atomic rename) is [`crate::store::PersistentStore`]'s job; this
//! module only does shape translation.

use crate::event::{Event, EventStore};
use crate::registration::{Attendee, EventBucket, RegistrationStore};
use crate::store::{read_optional, PersistentStore};
use crate::time::naive_as_jst_to_utc;
use anyhow::Context as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{error, warn};

fn parse_datetime_field(v: &Value) -> Option<DateTime<Utc>> {
    let raw = v.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive_as_jst_to_utc(naive);
        }
    }
    None
}

/// Parses one event entry. An event written before deadlines existed has no `event_deadline`
/// key at all; in that shape the field that used to be called `channel_id` actually held the
/// discussion thread's ID, so it's read back as `thread_id` instead and both `channel_id` and
/// `deadline` come back unset.
fn parse_event_record(v: &Value) -> anyhow::Result<Event> {
    let obj = v.as_object().context("event entry is not a JSON object")?;
    let name = obj
        .get("event_name")
        .and_then(Value::as_str)
        .context("missing event_name")?
        .to_owned();
    let venue = obj
        .get("venue")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let address = obj
        .get("address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let maps_link = obj
        .get("google_maps_link")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let start_time = obj
        .get("event_datetime")
        .and_then(parse_datetime_field)
        .with_context(|| format!("missing or unparseable event_datetime for {name}"))?;

    let is_legacy_format = !obj.contains_key("event_deadline");
    let (channel_id, thread_id, deadline) = if is_legacy_format {
        let thread_id = obj.get("channel_id").and_then(Value::as_u64);
        (None, thread_id, None)
    } else {
        let channel_id = obj.get("channel_id").and_then(Value::as_u64);
        let thread_id = obj.get("thread_id").and_then(Value::as_u64);
        let deadline = obj.get("event_deadline").and_then(parse_datetime_field);
        (channel_id, thread_id, deadline)
    };

    let drinks = obj
        .get("drinks")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    Ok(Event {
        name,
        venue,
        address,
        maps_link,
        start_time,
        deadline,
        channel_id,
        thread_id,
        message_id: obj.get("message_id").and_then(Value::as_u64),
        open: obj.get("open").and_then(Value::as_bool).unwrap_or(true),
        archived: obj.get("archived").and_then(Value::as_bool).unwrap_or(false),
        drinks,
        max_capacity: obj
            .get("max_capacity")
            .and_then(Value::as_u64)
            .map(|n| n as u32),
        creator_id: obj.get("creator_id").and_then(Value::as_u64),
        closed_attendance_count: obj
            .get("closed_attendance_count")
            .and_then(Value::as_u64)
            .map(|n| n as u32),
        ping_role_id: obj.get("ping_role_id").and_then(Value::as_u64),
        role_id: obj.get("role_id").and_then(Value::as_u64),
    })
}

fn event_to_value(e: &Event) -> Value {
    json!({
        "event_name": e.name,
        "venue": e.venue,
        "address": e.address,
        "google_maps_link": e.maps_link,
        "event_datetime": e.start_time.to_rfc3339(),
        "event_deadline": e.deadline.map(|d| d.to_rfc3339()),
        "channel_id": e.channel_id,
        "thread_id": e.thread_id,
        "message_id": e.message_id,
        "open": e.open,
        "archived": e.archived,
        "drinks": e.drinks,
        "max_capacity": e.max_capacity,
        "creator_id": e.creator_id,
        "closed_attendance_count": e.closed_attendance_count,
        "ping_role_id": e.ping_role_id,
        "role_id": e.role_id,
    })
}

/// Loads `events.json` through `store`. Per spec.md §6.1 the file's top level is a bare JSON
/// array (not wrapped in an object); a missing/empty file yields an empty [`EventStore`], and a
/// file that fails to parse as JSON at all is logged and also treated as empty (the file itself
/// is left untouched so a later successful load or a human can still recover it). Individual
/// entries that don't parse are skipped with a warning rather than aborting the whole load.
pub async fn load_events(store: &PersistentStore<Value>) -> EventStore {
    let root = match store.load().await {
        Ok(root) => root,
        Err(err) => {
            error!(error = ?err, "events file is not valid JSON; starting with an empty cache");
            return EventStore::new();
        }
    };

    let raw_events = match root {
        Value::Null => Vec::new(),
        Value::Array(arr) => arr,
        _ => {
            error!("events file has an unexpected top-level shape; starting with an empty cache");
            Vec::new()
        }
    };

    let mut events = Vec::with_capacity(raw_events.len());
    for raw in &raw_events {
        match parse_event_record(raw) {
            Ok(event) => events.push(event),
            Err(err) => warn!(error = ?err, "skipping unreadable event entry"),
        }
    }
    EventStore::from_events(events)
}

pub async fn save_events(store: &PersistentStore<Value>, events: &EventStore) -> anyhow::Result<()> {
    let records: Vec<Value> = events.all().map(event_to_value).collect();
    store.store(&Value::Array(records)).await
}

fn parse_attendee(v: &Value, event_name: &str) -> anyhow::Result<Attendee> {
    let obj = v.as_object().context("registration entry is not a JSON object")?;
    let user_id = obj
        .get("user_id")
        .and_then(Value::as_u64)
        .context("missing user_id")?;
    let username = obj
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let display_name = obj
        .get("display_name")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let extra_people = obj
        .get("extra_people")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u8;
    let extras_names = obj
        .get("extras_names")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    let behavior_confirmed = obj
        .get("behavior_confirmed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let arrival_confirmed = obj
        .get("arrival_confirmed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let timestamp = obj
        .get("timestamp")
        .and_then(parse_datetime_field)
        .unwrap_or_else(Utc::now);
    let drinks = obj
        .get("drinks")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    Ok(Attendee {
        user_id,
        username,
        display_name,
        extra_people,
        extras_names,
        behavior_confirmed,
        arrival_confirmed,
        event_name: event_name.to_owned(),
        timestamp,
        drinks,
    })
}

fn parse_attendee_list(arr: &[Value], event_name: &str) -> Vec<Attendee> {
    arr.iter()
        .filter_map(|v| match parse_attendee(v, event_name) {
            Ok(a) => Some(a),
            Err(err) => {
                warn!(error = ?err, event = event_name, "skipping unreadable registration entry");
                None
            }
        })
        .collect()
}

/// Reads the legacy sibling waitlist file (present only on installs that predate the combined
/// `{attendees, waitlist}` bucket shape), keyed by lowercased event name. Missing file, unparseable
/// JSON, or an unexpected top-level shape all fall back to an empty map rather than failing the
/// whole load.
async fn load_legacy_waitlist_file(path: &Path) -> HashMap<String, Vec<Value>> {
    let bytes = match read_optional(path).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return HashMap::new(),
        Err(err) => {
            error!(error = ?err, "failed to read legacy waitlist file; ignoring it");
            return HashMap::new();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(obj)) => obj
            .into_iter()
            .filter_map(|(name, v)| v.as_array().cloned().map(|arr| (name.to_lowercase(), arr)))
            .collect(),
        Ok(_) => {
            warn!("legacy waitlist file has an unexpected shape; ignoring it");
            HashMap::new()
        }
        Err(err) => {
            error!(error = ?err, "legacy waitlist file is not valid JSON; ignoring it");
            HashMap::new()
        }
    }
}

fn parse_bucket(value: &Value, legacy_waitlist: Option<&Vec<Value>>, event_name: &str) -> EventBucket {
    match value {
        // Pre-waitlist installs stored the bare confirmed list directly; any waitlist entries
        // lived in the sibling file instead.
        Value::Array(arr) => EventBucket {
            attendees: parse_attendee_list(arr, event_name),
            waitlist: legacy_waitlist
                .map(|w| parse_attendee_list(w, event_name))
                .unwrap_or_default(),
        },
        Value::Object(obj) => EventBucket {
            attendees: obj
                .get("attendees")
                .and_then(Value::as_array)
                .map(|a| parse_attendee_list(a, event_name))
                .unwrap_or_default(),
            waitlist: obj
                .get("waitlist")
                .and_then(Value::as_array)
                .map(|a| parse_attendee_list(a, event_name))
                .unwrap_or_default(),
        },
        _ => {
            warn!(event = event_name, "registration bucket has an unexpected shape; treating as empty");
            EventBucket::default()
        }
    }
}

/// Loads `responses.json`, merging in `legacy_waitlist_path` (the old standalone waitlist file)
/// for any bucket still in the bare-array legacy shape.
pub async fn load_responses(store: &PersistentStore<Value>, legacy_waitlist_path: &Path) -> RegistrationStore {
    let legacy_waitlist = load_legacy_waitlist_file(legacy_waitlist_path).await;

    let root = match store.load().await {
        Ok(root) => root,
        Err(err) => {
            error!(error = ?err, "responses file is not valid JSON; starting with an empty cache");
            return RegistrationStore::new();
        }
    };

    let obj = match root {
        Value::Null => return RegistrationStore::new(),
        Value::Object(obj) => obj,
        _ => {
            error!("responses file has an unexpected top-level shape; starting with an empty cache");
            return RegistrationStore::new();
        }
    };

    let mut buckets = HashMap::with_capacity(obj.len());
    for (name, value) in obj {
        let key = name.to_lowercase();
        let bucket = parse_bucket(&value, legacy_waitlist.get(&key), &name);
        buckets.insert(key, bucket);
    }
    RegistrationStore::from_buckets(buckets)
}

fn attendee_to_value(a: &Attendee) -> Value {
    json!({
        "user_id": a.user_id,
        "username": a.username,
        "display_name": a.display_name,
        "extra_people": a.extra_people,
        "extras_names": a.extras_names,
        "behavior_confirmed": a.behavior_confirmed,
        "arrival_confirmed": a.arrival_confirmed,
        "timestamp": a.timestamp.to_rfc3339(),
        "drinks": a.drinks,
    })
}

fn bucket_to_value(bucket: &EventBucket) -> Value {
    json!({
        "attendees": bucket.attendees.iter().map(attendee_to_value).collect::<Vec<_>>(),
        "waitlist": bucket.waitlist.iter().map(attendee_to_value).collect::<Vec<_>>(),
    })
}

/// Saves `responses.json` in the current `{attendees, waitlist}` shape, keyed by each event's
/// true-cased name where a matching event still exists (so a manual edit of the file stays
/// readable); a bucket whose event has since disappeared falls back to its lowercased key.
pub async fn save_responses(
    store: &PersistentStore<Value>,
    events: &EventStore,
    registrations: &RegistrationStore,
) -> anyhow::Result<()> {
    let mut map = serde_json::Map::new();
    let mut seen = HashSet::new();

    for event in events.all() {
        let key = event.name.to_lowercase();
        if let Some(bucket) = registrations.buckets().get(&key) {
            map.insert(event.name.clone(), bucket_to_value(bucket));
        }
        seen.insert(key);
    }
    for (key, bucket) in registrations.buckets() {
        if !seen.contains(key) {
            map.insert(key.clone(), bucket_to_value(bucket));
        }
    }

    store.store(&Value::Object(map)).await
}
