//! Event-Action Orchestrator (C7): the only component that holds both the event store and the
//! registration store at once, behind a single coarse `RwLock` so every operation sees a
//! consistent snapshot of both. Each method persists inside the lock and returns a [`Plan`] of
//! chat-platform side effects for the caller to apply once the lock is released — announcements,
//! DMs, and role changes never block registration state on a slow network call.

use crate::chat::{ChatClient, Effect, Plan};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{OpError, OpResult};
use crate::event::{Event, EventPatch, EventStore, NewEvent};
use crate::persistence::{load_events, load_responses, save_events, save_responses};
use crate::registration::{Attendee, RegistrationStore};
use crate::scheduler::{AlertScheduler, Task, TaskRunner};
use crate::{admission, promotion};
use chrono::Duration;
use derivative::Derivative;
use lazy_static::lazy_static;
use serde_json::Value;
use serenity::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

lazy_static! {
    /// Offsets before a deadline at which a reminder fires (spec.md §4.6). `∆ = 0` is handled
    /// separately as the `AutoClose` task in [`Engine::schedule_event_tasks`]; every other offset
    /// here becomes a `SendMessage` reminder at `deadline - offset`.
    static ref REMINDER_OFFSETS: Vec<Duration> = vec![
        Duration::days(1),
        Duration::days(3),
        Duration::days(7),
    ];
}

/// Fixed bilingual rules block appended to every event announcement, matching the original
/// system's `OFFKAI_MESSAGE` template (spec.md §1 treats chat rendering as out of scope, but this
/// is a static string the orchestrator hands to `send_message`, not rendering logic).
const ANNOUNCEMENT_RULES: &str = "\n\n\u{2139}\u{FE0F} Please confirm the venue rules and arrival time before registering.\n\u{2139}\u{FE0F} 参加登録の前に、会場のルールと集合時間をご確認ください。";

fn announcement_text(event: &Event) -> String {
    format!(
        "\u{1F4C5} **{name}** has been scheduled! Registration is now open.\n\u{1F4C5} 「{name}」の開催が決定しました。参加受付を開始します。{rules}",
        name = event.name,
        rules = ANNOUNCEMENT_RULES,
    )
}

fn archived_text(event: &Event) -> String {
    format!(
        "\u{1F512} **{name}** has been archived and is now locked.\n\u{1F512} 「{name}」はアーカイブされ、ロックされました。",
        name = event.name
    )
}

fn status_text(event: &Event) -> String {
    if event.open {
        format!("\u{1F7E2} **{name}** registration is open.", name = event.name)
    } else {
        format!("\u{1F534} **{name}** registration is closed.", name = event.name)
    }
}

/// The "refresh pinned message" effect spec.md §4.7 calls for on close/reopen/promote: an
/// `EditMessage` against the event's announcement message, re-rendering its open/closed status.
/// A no-op (empty plan) if the event has no recorded `message_id` yet.
fn pinned_message_refresh(event: &Event) -> Plan {
    match (event.thread_id.or(event.channel_id), event.message_id) {
        (Some(channel_id), Some(message_id)) => vec![Effect::EditMessage {
            channel_id,
            message_id,
            content: status_text(event),
        }],
        _ => vec![],
    }
}

fn reminder_text(event: &Event, offset: Duration) -> String {
    format!(
        "\u{23F0} Reminder: registration for **{name}** closes in {hours}h.\n\u{23F0} リマインダー: 「{name}」の参加受付締切まで残り{hours}時間です。",
        name = event.name,
        hours = offset.num_hours(),
    )
}

fn capacity_reached_text(event: &Event) -> String {
    format!(
        "\u{1F389} **{name}** has reached capacity; further registrations go to the waitlist.\n\u{1F389} 「{name}」は定員に達しました。以降の申込はキャンセル待ちとなります。",
        name = event.name
    )
}

fn auto_close_text(event: &Event) -> String {
    format!(
        "\u{1F512} Registration for **{name}** has closed (deadline reached).\n\u{1F512} 「{name}」の参加受付を締め切りました(締切時刻に達しました)。",
        name = event.name
    )
}

fn promotion_text(event: &Event) -> String {
    format!(
        "\u{1F389} A spot opened up for **{name}** — you've been moved off the waitlist and confirmed!\n\u{1F389} 「{name}」に空きが出たため、キャンセル待ちから繰り上げ当選となりました。",
        name = event.name
    )
}

struct State {
    events: EventStore,
    registrations: RegistrationStore,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Engine {
    #[derivative(Debug = "ignore")]
    state: RwLock<State>,
    clock: SharedClock,
    scheduler: Arc<AlertScheduler>,
    #[derivative(Debug = "ignore")]
    chat: Arc<dyn ChatClient>,
    events_store: crate::store::PersistentStore<Value>,
    responses_store: crate::store::PersistentStore<Value>,
}

impl Engine {
    /// Opens the backing stores, loads both caches (applying any legacy-format migration), and
    /// starts the alert scheduler's once-a-minute worker loop.
    pub async fn open(config: &Config, clock: SharedClock, chat: Arc<dyn ChatClient>) -> anyhow::Result<Arc<Self>> {
        let events_store = crate::store::PersistentStore::open(&config.events_file).await?;
        let responses_store = crate::store::PersistentStore::open(&config.responses_file).await?;

        let events = load_events(&events_store).await;
        let registrations = load_responses(&responses_store, Path::new(&config.waitlist_file)).await;

        let engine = Arc::new(Engine {
            state: RwLock::new(State { events, registrations }),
            scheduler: Arc::new(AlertScheduler::new(clock.clone())),
            clock,
            chat,
            events_store,
            responses_store,
        });

        // spec.md §4.1: "after merge, save once and do not re-migrate." Writing back here, before
        // anything else touches the stores, retires the legacy `waitlist.json` file and rewrites
        // `events.json`/`responses.json` in current-format shape even if the process never
        // receives a single mutating command before its next restart.
        {
            let state = engine.state.read().await;
            if let Err(err) = engine.persist(&state).await {
                error!(error = ?err, "failed to persist migrated stores on startup");
            }
        }

        engine.recover_schedule().await;
        Arc::clone(&engine.scheduler).start(Arc::clone(&engine));
        Ok(engine)
    }

    /// Re-registers reminder/auto-close tasks for every known event after a restart. Offsets
    /// that have already passed are silently skipped (`AlertScheduler::register` rejects them).
    async fn recover_schedule(&self) {
        let state = self.state.read().await;
        for event in state.events.all() {
            self.schedule_event_tasks(event).await;
        }
    }

    async fn schedule_event_tasks(&self, event: &Event) {
        if event.archived {
            return;
        }
        let Some(deadline) = event.deadline else { return };
        let Some(channel_id) = event.thread_id.or(event.channel_id) else { return };

        for offset in REMINDER_OFFSETS.iter() {
            let fire_at = deadline - *offset;
            let label = format!("{} reminder ({}h)", event.name, offset.num_hours());
            let _ = self
                .scheduler
                .register(
                    fire_at,
                    Task::SendMessage {
                        channel_id,
                        text: reminder_text(event, *offset),
                    },
                    &label,
                )
                .await;
        }

        if event.open {
            let label = format!("{} auto-close", event.name);
            let _ = self
                .scheduler
                .register(
                    deadline,
                    Task::AutoClose {
                        event_name: event.name.clone(),
                        message: auto_close_text(event),
                    },
                    &label,
                )
                .await;
        }
    }

    async fn persist(&self, state: &State) -> anyhow::Result<()> {
        save_events(&self.events_store, &state.events).await?;
        save_responses(&self.responses_store, &state.events, &state.registrations).await?;
        Ok(())
    }

    /// The returned plan only ever contains a `SendMessage` for the announcement — no
    /// `message_id` is known yet to pin against. The caller applies the plan with
    /// [`crate::chat::apply_plan`], then passes the ID it gets back from the `SendMessage`
    /// outcome to [`Engine::record_message_id`], whose own returned plan is what actually pins
    /// the announcement.
    pub async fn create_event(&self, fields: NewEvent) -> OpResult<(Event, Plan)> {
        let now = self.clock.now();
        let event = {
            let mut state = self.state.write().await;
            let event = state.events.add(fields, now)?.clone();
            if let Err(err) = self.persist(&state).await {
                error!(error = ?err, "failed to persist after create_event");
            }
            event
        };

        self.schedule_event_tasks(&event).await;

        let plan = match event.thread_id.or(event.channel_id) {
            Some(channel_id) => vec![Effect::SendMessage {
                channel_id,
                content: announcement_text(&event),
            }],
            None => vec![],
        };
        Ok((event, plan))
    }

    /// Records the message ID of an event's announcement once the caller has actually sent it
    /// (spec.md §3.2: participants RSVP "through an interactive form attached to a pinned
    /// message", so the engine needs to remember which message that is). Returns the follow-up
    /// plan to pin it; the caller should check [`crate::chat::PlanOutcome::pin_failure`] after
    /// applying that plan, since spec.md §7 surfaces pin failures rather than swallowing them.
    pub async fn record_message_id(&self, name: &str, message_id: u64) -> OpResult<Plan> {
        let event = {
            let mut state = self.state.write().await;
            state.events.set_message_id(name, message_id)?;
            let event = state.events.get(name)?.clone();
            if let Err(err) = self.persist(&state).await {
                error!(error = ?err, "failed to persist after record_message_id");
            }
            event
        };

        Ok(match event.thread_id.or(event.channel_id) {
            Some(channel_id) => vec![Effect::PinMessage { channel_id, message_id }],
            None => vec![],
        })
    }

    pub async fn modify_event(&self, name: &str, patch: EventPatch) -> OpResult<(Event, Plan)> {
        let now = self.clock.now();
        let (event, promoted, deadline_changed) = {
            let mut state = self.state.write().await;
            let before = state.events.get(name)?.clone();
            let head_count = state.registrations.head_count(name);
            let waitlist_non_empty = !state.registrations.get_waitlist(name).is_empty();

            let event = state
                .events
                .update(name, patch, head_count, waitlist_non_empty, now)?
                .clone();

            // C5 trigger (b): a capacity increase may free up room for waitlisted users.
            let promoted = match (before.max_capacity, event.max_capacity) {
                (Some(old), Some(new)) if new > old => {
                    promotion::promote(&event, &mut state.registrations, promotion::PromotionTrigger::CapacityIncrease)
                }
                (Some(_), None) => {
                    promotion::promote(&event, &mut state.registrations, promotion::PromotionTrigger::CapacityIncrease)
                }
                _ => Vec::new(),
            };

            if let Err(err) = self.persist(&state).await {
                error!(error = ?err, "failed to persist after modify_event");
            }
            (event, promoted, before.deadline != event.deadline)
        };

        // Deadline changes re-register reminders/auto-close at the new offsets (spec.md §4.6).
        if deadline_changed {
            self.schedule_event_tasks(&event).await;
        }

        let plan = promoted
            .iter()
            .map(|a| Effect::DmUser {
                user_id: a.user_id,
                content: promotion_text(&event),
            })
            .collect();
        Ok((event, plan))
    }

    /// `close_message`, if given, is posted to the event's thread in addition to the pinned
    /// message refresh (spec.md §4.7 "close").
    pub async fn close_event(&self, name: &str, close_message: Option<String>) -> OpResult<(Event, Plan)> {
        let mut state = self.state.write().await;
        let head_count = state.registrations.head_count(name);
        let event = state.events.set_open_status(name, false, head_count)?.clone();
        if let Err(err) = self.persist(&state).await {
            error!(error = ?err, "failed to persist after close_event");
        }
        drop(state);

        let mut plan = pinned_message_refresh(&event);
        if let (Some(message), Some(channel_id)) = (close_message, event.thread_id.or(event.channel_id)) {
            plan.push(Effect::SendMessage { channel_id, content: message });
        }
        Ok((event, plan))
    }

    pub async fn reopen_event(&self, name: &str) -> OpResult<(Event, Vec<Attendee>, Plan)> {
        let (event, promoted) = {
            let mut state = self.state.write().await;
            let event = state.events.set_open_status(name, true, 0)?.clone();
            let promoted = promotion::promote(&event, &mut state.registrations, promotion::PromotionTrigger::Reopen);
            if let Err(err) = self.persist(&state).await {
                error!(error = ?err, "failed to persist after reopen_event");
            }
            (event, promoted)
        };

        let mut plan = pinned_message_refresh(&event);
        plan.extend(promoted.iter().map(|a| Effect::DmUser {
            user_id: a.user_id,
            content: promotion_text(&event),
        }));
        Ok((event, promoted, plan))
    }

    /// `guild_id` is supplied by the caller from its own command context (spec.md §1: the core
    /// holds no notion of "which guild" an event belongs to) and is only used to scope the
    /// best-effort role-deletion effect.
    pub async fn archive_event(&self, name: &str, guild_id: Option<u64>) -> OpResult<(Event, Plan)> {
        let mut state = self.state.write().await;
        let event = state.events.archive(name)?.clone();
        if let Err(err) = self.persist(&state).await {
            error!(error = ?err, "failed to persist after archive_event");
        }
        drop(state);

        let mut plan = Vec::new();
        if let Some(channel_id) = event.thread_id.or(event.channel_id) {
            if let Some(message_id) = event.message_id {
                plan.push(Effect::EditMessage {
                    channel_id,
                    message_id,
                    content: archived_text(&event),
                });
            }
        }
        // Role deletion is best-effort and must not block archival (spec.md §4.7): it's just
        // another entry in the plan, applied outside the lock and logged-and-continued on
        // failure by `crate::chat::apply_plan`.
        if let (Some(guild_id), Some(role_id)) = (guild_id, event.role_id) {
            plan.push(Effect::DeleteRole { guild_id, role_id });
        }
        Ok((event, plan))
    }

    /// Validates and admits a prospective registration (C4), placing it in the confirmed list or
    /// the waitlist per [`admission::decide_admission`].
    pub async fn register(&self, name: &str, mut registrant: Attendee) -> OpResult<(admission::AdmissionDecision, Plan)> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let event = state.events.get(name)?.clone();

        registrant.event_name = event.name.clone();
        registrant.timestamp = now;
        registrant.validate(event.has_drinks())?;

        let head_count_before = state.registrations.head_count(&event.name);
        let decision = admission::decide_admission(&event, head_count_before, registrant.party_size(), now);

        match decision {
            admission::AdmissionDecision::Confirm => {
                state.registrations.add_confirmed(&event.name, registrant)?;
            }
            admission::AdmissionDecision::Waitlist { .. } => {
                state.registrations.add_waitlist(&event.name, registrant)?;
            }
        }
        let head_count_after = state.registrations.head_count(&event.name);

        if let Err(err) = self.persist(&state).await {
            error!(error = ?err, "failed to persist after register");
        }

        let mut plan = Vec::new();
        if matches!(decision, admission::AdmissionDecision::Confirm)
            && admission::capacity_just_reached(&event, head_count_before, head_count_after)
        {
            if let Some(channel_id) = event.thread_id.or(event.channel_id) {
                plan.push(Effect::SendMessage {
                    channel_id,
                    content: capacity_reached_text(&event),
                });
            }
        }
        Ok((decision, plan))
    }

    /// Withdraws `user_id` from `name`, trying the confirmed list first. A confirmed withdrawal
    /// triggers promotion (C5); a waitlist withdrawal does not.
    pub async fn withdraw(&self, name: &str, user_id: u64) -> OpResult<(Vec<Attendee>, Plan)> {
        let mut state = self.state.write().await;
        let event = state.events.get(name)?.clone();

        let promoted = if state.registrations.remove_confirmed(&event.name, user_id).is_ok() {
            promotion::promote(&event, &mut state.registrations, promotion::PromotionTrigger::Withdrawal)
        } else {
            state.registrations.remove_waitlist(&event.name, user_id)?;
            Vec::new()
        };

        if let Err(err) = self.persist(&state).await {
            error!(error = ?err, "failed to persist after withdraw");
        }

        let plan = promoted
            .iter()
            .map(|a| Effect::DmUser {
                user_id: a.user_id,
                content: promotion_text(&event),
            })
            .collect();
        Ok((promoted, plan))
    }

    /// Organizer-initiated manual promotion: moves one specific waitlist entry to confirmed,
    /// bypassing FIFO order and the capacity checks the automatic promotion engine applies.
    pub async fn promote_user(&self, name: &str, user_id: u64) -> OpResult<(Attendee, Plan)> {
        let mut state = self.state.write().await;
        let event = state.events.get(name)?.clone();
        let attendee = state.registrations.promote_specific(&event.name, user_id)?;
        state.registrations.push_confirmed_preserving(&event.name, attendee.clone());

        if let Err(err) = self.persist(&state).await {
            error!(error = ?err, "failed to persist after promote_user");
        }

        let mut plan = vec![Effect::DmUser {
            user_id: attendee.user_id,
            content: promotion_text(&event),
        }];
        plan.extend(pinned_message_refresh(&event));
        Ok((attendee, plan))
    }

    pub async fn get_event(&self, name: &str) -> OpResult<Event> {
        self.state.read().await.events.get(name).cloned()
    }
}


#[async_trait]
impl TaskRunner for Engine {
    async fn run(&self, task: &Task) -> anyhow::Result<()> {
        match task {
            Task::SendMessage { channel_id, text } => {
                self.chat
                    .send_message(*channel_id, text)
                    .await
                    .map(|_| ())
                    .map_err(anyhow::Error::from)
            }
            Task::AutoClose { event_name, message } => {
                let (_event, plan) = match self.close_event(event_name, Some(message.clone())).await {
                    Ok(result) => result,
                    Err(OpError::AlreadyClosed(_)) | Err(OpError::Archived(_)) => return Ok(()),
                    Err(other) => return Err(other.into()),
                };
                let _ = crate::chat::apply_plan(self.chat.as_ref(), plan).await;
                Ok(())
            }
        }
    }
}
