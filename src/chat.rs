//! Chat-platform collaborator: the engine only ever talks to [`ChatClient`], never to `serenity`
//! directly, so command parsing, embed rendering, and every other out-of-scope surface can stay
//! out of this crate's core without the engine caring which chat platform it's wired to.
//! [`SerenityChatClient`] is the one concrete implementation.
//!
//! Every mutation produces a [`Plan`] — a list of [`Effect`]s to run after the coarse lock in
//! [`crate::engine`] is released, so a slow or failing network call never holds registration
//! state hostage.

use crate::error::ChatError;
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Channel;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::error;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64, ChatError>;
    async fn pin_message(&self, channel_id: u64, message_id: u64) -> Result<(), ChatError>;
    async fn edit_message(&self, channel_id: u64, message_id: u64, content: &str) -> Result<(), ChatError>;
    async fn fetch_thread(&self, thread_id: u64) -> Result<ThreadInfo, ChatError>;
    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), ChatError>;
    async fn assign_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError>;
    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError>;
    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<(), ChatError>;
}

#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: u64,
    pub parent_channel_id: Option<u64>,
    pub name: String,
    pub archived: bool,
}

/// One side effect to carry out against the chat platform. Produced by the orchestrator, applied
/// by [`apply_plan`] outside the registration lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendMessage { channel_id: u64, content: String },
    PinMessage { channel_id: u64, message_id: u64 },
    EditMessage { channel_id: u64, message_id: u64, content: String },
    DmUser { user_id: u64, content: String },
    AssignRole { guild_id: u64, user_id: u64, role_id: u64 },
    RemoveRole { guild_id: u64, user_id: u64, role_id: u64 },
    DeleteRole { guild_id: u64, role_id: u64 },
}

pub type Plan = Vec<Effect>;

/// Returns `Some(message_id)` for a successful `SendMessage`, `None` for every other effect.
async fn apply_effect(client: &dyn ChatClient, effect: &Effect) -> Result<Option<u64>, ChatError> {
    match effect {
        Effect::SendMessage { channel_id, content } => {
            client.send_message(*channel_id, content).await.map(Some)
        }
        Effect::PinMessage { channel_id, message_id } => {
            client.pin_message(*channel_id, *message_id).await.map(|_| None)
        }
        Effect::EditMessage { channel_id, message_id, content } => {
            client.edit_message(*channel_id, *message_id, content).await.map(|_| None)
        }
        Effect::DmUser { user_id, content } => {
            client.dm_user(*user_id, content).await.map(|_| None)
        }
        Effect::AssignRole { guild_id, user_id, role_id } => {
            client.assign_role(*guild_id, *user_id, *role_id).await.map(|_| None)
        }
        Effect::RemoveRole { guild_id, user_id, role_id } => {
            client.remove_role(*guild_id, *user_id, *role_id).await.map(|_| None)
        }
        Effect::DeleteRole { guild_id, role_id } => {
            client.delete_role(*guild_id, *role_id).await.map(|_| None)
        }
    }
}

/// What happened when a [`Plan`] was applied.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// IDs returned by each `SendMessage` effect in the plan, in plan order.
    pub sent_message_ids: Vec<u64>,
    /// The first `PinMessage` failure encountered, if any. Per spec.md §7, pin failures are the
    /// one external-I/O failure kind that surfaces to the caller rather than being
    /// logged-and-swallowed like every other effect.
    pub pin_failure: Option<ChatError>,
}

/// Runs every effect in order. Most effects are logged and swallowed on failure — a failed DM or
/// a role that's already gone shouldn't stop the rest of the plan from applying — but a failed
/// `PinMessage` is additionally carried back in the returned [`PlanOutcome`] per spec.md §7.
pub async fn apply_plan(client: &dyn ChatClient, plan: Plan) -> PlanOutcome {
    let mut outcome = PlanOutcome::default();
    for effect in plan {
        match apply_effect(client, &effect).await {
            Ok(Some(message_id)) => outcome.sent_message_ids.push(message_id),
            Ok(None) => {}
            Err(err) => {
                if matches!(effect, Effect::PinMessage { .. }) {
                    error!(?effect, error = ?err, "pin effect failed");
                    outcome.pin_failure.get_or_insert(err);
                } else {
                    error!(?effect, error = ?err, "chat effect failed");
                }
            }
        }
    }
    outcome
}

fn map_serenity_err(err: serenity::Error) -> ChatError {
    use serenity::http::error::ErrorResponse;
    use serenity::Error::Http as HttpErr;

    if let HttpErr(ref boxed) = err {
        if let serenity::http::HttpError::UnsuccessfulRequest(ErrorResponse { status_code, .. }) = boxed.as_ref() {
            return match status_code.as_u16() {
                403 => ChatError::Forbidden,
                404 => ChatError::NotFound(err.to_string()),
                _ => ChatError::Transport(anyhow::Error::new(err)),
            };
        }
    }
    ChatError::Transport(anyhow::Error::new(err))
}

/// The production [`ChatClient`], backed by `serenity`'s REST client. Holds only an `Http`
/// handle (no gateway/cache) since the engine never needs anything beyond issuing requests.
pub struct SerenityChatClient {
    http: Arc<Http>,
}

impl SerenityChatClient {
    pub fn new(http: Arc<Http>) -> Self {
        SerenityChatClient { http }
    }
}

#[async_trait]
impl ChatClient for SerenityChatClient {
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64, ChatError> {
        let message = ChannelId(channel_id)
            .send_message(&self.http, |m| m.content(content))
            .await
            .map_err(map_serenity_err)?;
        Ok(message.id.0)
    }

    async fn pin_message(&self, channel_id: u64, message_id: u64) -> Result<(), ChatError> {
        ChannelId(channel_id)
            .pin(&self.http, message_id)
            .await
            .map_err(map_serenity_err)
    }

    async fn edit_message(&self, channel_id: u64, message_id: u64, content: &str) -> Result<(), ChatError> {
        ChannelId(channel_id)
            .edit_message(&self.http, message_id, |m| m.content(content))
            .await
            .map_err(map_serenity_err)?;
        Ok(())
    }

    async fn fetch_thread(&self, thread_id: u64) -> Result<ThreadInfo, ChatError> {
        let channel = ChannelId(thread_id)
            .to_channel(&self.http)
            .await
            .map_err(map_serenity_err)?;
        match channel {
            Channel::Guild(guild_channel) => Ok(ThreadInfo {
                id: guild_channel.id.0,
                parent_channel_id: guild_channel.parent_id.map(|id| id.0),
                name: guild_channel.name,
                archived: guild_channel
                    .thread_metadata
                    .map(|m| m.archived)
                    .unwrap_or(false),
            }),
            _ => Err(ChatError::NotFound(format!("{thread_id} is not a guild thread"))),
        }
    }

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), ChatError> {
        let dm_channel = UserId(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(map_serenity_err)?;
        dm_channel
            .id
            .send_message(&self.http, |m| m.content(content))
            .await
            .map_err(map_serenity_err)?;
        Ok(())
    }

    async fn assign_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError> {
        self.http
            .add_member_role(guild_id, user_id, role_id, None)
            .await
            .map_err(map_serenity_err)
    }

    async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, None)
            .await
            .map_err(map_serenity_err)
    }

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<(), ChatError> {
        GuildId(guild_id)
            .delete_role(&self.http, RoleId(role_id))
            .await
            .map_err(map_serenity_err)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records every effect it's asked to apply instead of making network calls; used by
    /// [`crate::engine`]'s tests to assert on the plan a mutation produces.
    #[derive(Default)]
    pub struct RecordingChatClient {
        pub sent: Mutex<Vec<Effect>>,
        pub next_message_id: Mutex<u64>,
        /// When set, `pin_message` fails with `ChatError::Forbidden` instead of recording.
        pub fail_pin: Mutex<bool>,
    }

    impl RecordingChatClient {
        pub fn new() -> Self {
            RecordingChatClient {
                sent: Mutex::new(Vec::new()),
                next_message_id: Mutex::new(1),
                fail_pin: Mutex::new(false),
            }
        }

        pub fn taken(&self) -> Vec<Effect> {
            std::mem::take(&mut self.sent.lock())
        }
    }

    #[async_trait]
    impl ChatClient for RecordingChatClient {
        async fn send_message(&self, channel_id: u64, content: &str) -> Result<u64, ChatError> {
            self.sent.lock().push(Effect::SendMessage {
                channel_id,
                content: content.to_owned(),
            });
            let mut next = self.next_message_id.lock();
            let id = *next;
            *next += 1;
            Ok(id)
        }

        async fn pin_message(&self, channel_id: u64, message_id: u64) -> Result<(), ChatError> {
            if *self.fail_pin.lock() {
                return Err(ChatError::Forbidden);
            }
            self.sent.lock().push(Effect::PinMessage { channel_id, message_id });
            Ok(())
        }

        async fn edit_message(&self, channel_id: u64, message_id: u64, content: &str) -> Result<(), ChatError> {
            self.sent.lock().push(Effect::EditMessage {
                channel_id,
                message_id,
                content: content.to_owned(),
            });
            Ok(())
        }

        async fn fetch_thread(&self, thread_id: u64) -> Result<ThreadInfo, ChatError> {
            Ok(ThreadInfo {
                id: thread_id,
                parent_channel_id: None,
                name: "test-thread".into(),
                archived: false,
            })
        }

        async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), ChatError> {
            self.sent.lock().push(Effect::DmUser {
                user_id,
                content: content.to_owned(),
            });
            Ok(())
        }

        async fn assign_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError> {
            self.sent.lock().push(Effect::AssignRole { guild_id, user_id, role_id });
            Ok(())
        }

        async fn remove_role(&self, guild_id: u64, user_id: u64, role_id: u64) -> Result<(), ChatError> {
            self.sent.lock().push(Effect::RemoveRole { guild_id, user_id, role_id });
            Ok(())
        }

        async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<(), ChatError> {
            self.sent.lock().push(Effect::DeleteRole { guild_id, role_id });
            Ok(())
        }
    }
}
