//! Promotion Engine (C5, spec.md §4.5): batch-promotes waitlisted users into the confirmed list
//! after a withdrawal, a capacity increase, or a reopen — respecting capacity and the
//! `closed_attendance_count` cap, head-of-line only.

use crate::event::Event;
use crate::registration::{Attendee, RegistrationStore};

/// What caused promotion to run. Only [`PromotionTrigger::Withdrawal`] interacts with the
/// legacy "unlimited capacity caps promotion at one" carve-out (spec.md §4.5, §9 Open Question);
/// the other triggers cascade through the whole fitting prefix of the waitlist even when
/// capacity is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionTrigger {
    Withdrawal,
    CapacityIncrease,
    Reopen,
}

/// `effective_target_capacity(E)` from spec.md §4.5: an event closed at head-count 30 out of a
/// 50-seat cap doesn't re-fill past 30 just because a spot opened up.
fn effective_target_capacity(event: &Event) -> Option<u32> {
    match event.closed_attendance_count {
        Some(closed) => Some(match event.max_capacity {
            Some(cap) => closed.min(cap),
            None => closed,
        }),
        None => event.max_capacity,
    }
}

/// Runs the promotion algorithm and returns, in promotion order, the entries that were moved
/// from waitlist to confirmed. Mutates `store` directly; does not persist or emit side effects
/// itself — the orchestrator (C7) does both after inspecting the returned list.
pub fn promote(event: &Event, store: &mut RegistrationStore, trigger: PromotionTrigger) -> Vec<Attendee> {
    let target = effective_target_capacity(event);
    let mut promoted = Vec::new();

    loop {
        if let Some(target) = target {
            if store.head_count(&event.name) >= target {
                break;
            }
        }

        let head = match store.get_waitlist(&event.name).first() {
            Some(head) => head.clone(),
            None => break,
        };

        if let Some(target) = target {
            // Head-of-line only: if the front of the queue doesn't fit, stop even though a
            // smaller party further back might (FIFO fairness, spec.md §4.5).
            if store.head_count(&event.name) + head.party_size() > target {
                break;
            }
        }

        let entry = store
            .promote_head(&event.name)
            .expect("just peeked a non-empty waitlist");
        store.push_confirmed_preserving(&event.name, entry.clone());
        promoted.push(entry);

        if target.is_none() && trigger == PromotionTrigger::Withdrawal {
            // Legacy carve-out: unlimited-capacity events only promote one entry per withdrawal,
            // they don't cascade the whole waitlist (spec.md §9 Open Question — preserved for
            // fidelity, not changed without an explicit product decision).
            break;
        }
    }

    promoted
}
