//! Chore queries built on [`Assignment`].

use chrono::NaiveDate;

use splitfair_common::{Assignment, Chore, UserId};

pub fn assignees(chore: &Chore) -> &[UserId] {
    chore.assignment.assignees()
}

pub fn is_assigned_to(chore: &Chore, user: &UserId) -> bool {
    chore.assignment.includes(user)
}

/// The member after `current` in `members`, wrapping around. Falls back to
/// the first member when `current` is not in the list.
pub fn next_in_rotation<'a>(members: &'a [UserId], current: &UserId) -> Option<&'a UserId> {
    let position = members.iter().position(|m| m == current);
    match position {
        Some(i) => members.get((i + 1) % members.len()),
        None => members.first(),
    }
}

/// Reassign a single-assignee chore to the next member. Shared chores are
/// left as they are.
pub fn rotate(chore: &mut Chore, members: &[UserId]) -> bool {
    let Assignment::Single(current) = &chore.assignment else {
        return false;
    };
    let Some(next) = next_in_rotation(members, current) else {
        return false;
    };
    if next == current {
        return false;
    }
    tracing::debug!(chore = %chore.id, from = %current, to = %next, "rotating chore");
    chore.assignment = Assignment::Single(next.clone());
    true
}

/// Open chores assigned to `user`.
pub fn chores_for<'a>(chores: &'a [Chore], user: &UserId) -> Vec<&'a Chore> {
    chores
        .iter()
        .filter(|c| !c.completed && is_assigned_to(c, user))
        .collect()
}

pub fn is_overdue(chore: &Chore, today: NaiveDate) -> bool {
    !chore.completed && chore.due_date.is_some_and(|due| due < today)
}

pub fn overdue<'a>(chores: &'a [Chore], today: NaiveDate) -> Vec<&'a Chore> {
    chores.iter().filter(|c| is_overdue(c, today)).collect()
}
