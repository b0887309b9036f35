//! Domain error kinds for the event & registration state engine (spec.md §7).
//!
//! These are deliberately a closed `thiserror` enum rather than `anyhow::Error`: callers (the
//! orchestrator, and eventually chat-command handlers) need to match on the specific rejection
//! reason to pick a user-facing message, and tests assert on specific variants.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpError {
    #[error("no event named '{0}'")]
    EventNotFound(String),

    #[error("an event named '{0}' already exists")]
    EventDuplicate(String),

    #[error("user {0} is already registered for '{1}'")]
    RegistrationDuplicate(u64, String),

    #[error("user {0} is not registered for '{1}'")]
    RegistrationNotFound(u64, String),

    #[error("user {0} is not on the waitlist for '{1}'")]
    WaitlistNotFound(u64, String),

    #[error("event '{0}' is archived and can no longer be modified")]
    Archived(String),

    #[error("event '{0}' is already open")]
    AlreadyOpen(String),

    #[error("event '{0}' is already closed")]
    AlreadyClosed(String),

    #[error("event '{0}' is already archived")]
    AlreadyArchived(String),

    #[error("couldn't parse a date/time for event '{0}'")]
    InvalidDateTime(String),

    #[error("start time for event '{0}' is in the past")]
    DateTimeInPast(String),

    #[error("deadline for event '{0}' must be before its start time")]
    DeadlineAfterEvent(String),

    #[error("deadline for event '{0}' has already passed")]
    DeadlineInPast(String),

    #[error("new capacity for '{0}' is below the number of confirmed attendees")]
    CapacityBelowCurrent(String),

    #[error("can't raise the effective capacity cap for '{0}' while the waitlist is non-empty")]
    CapacityWithWaitlist(String),

    #[error("no changes to apply to event '{0}'")]
    NoChanges(String),

    #[error("can't schedule a task for '{0}' in the past")]
    TimeInPast(String),

    #[error("extras_names length ({0}) doesn't match extra_people ({1}) for event '{2}'")]
    ExtrasNamesMismatch(usize, u8, String),

    #[error("drinks selection length ({0}) doesn't match party size ({1}) for event '{2}'")]
    DrinksMismatch(usize, u8, String),

    #[error("extra_people must be between 0 and 5, got {0}")]
    ExtraPeopleOutOfRange(u8),
}

pub type OpResult<T> = std::result::Result<T, OpError>;

/// Errors surfaced by the abstract chat-platform collaborator (spec.md §6.2). Kept separate from
/// [`OpError`] since these originate outside the engine and are always logged-and-continued
/// rather than matched on by callers, except where noted in spec.md §7 (pin failures surface,
/// send failures do not).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("forbidden: the bot lacks permission for this action")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error talking to the chat platform: {0}")]
    Transport(#[from] anyhow::Error),
}
