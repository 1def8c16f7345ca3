//! Expense splitting and settlement. All amounts are integer cents.

use std::collections::{BTreeMap, HashMap};

use splitfair_common::{Expense, ExpenseSplit, RecordId, UserId};

use crate::errors::ExpenseError;

/// One participant's share of an expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub user: UserId,
    pub amount_cents: i64,
}

/// A payment that settles part of the household's balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: UserId,
    pub to: UserId,
    pub amount_cents: i64,
}

/// Parse a decimal amount such as `"12"`, `"12.5"` or `"$12.34"` into cents.
pub fn parse_amount(raw: &str) -> Result<i64, ExpenseError> {
    let invalid = || ExpenseError::InvalidAmount(raw.to_string());
    let text = raw.trim();
    let text = text.strip_prefix('$').unwrap_or(text);
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };
    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(invalid)
}

/// Format cents as `12.34`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Split `amount_cents` evenly. The remainder goes one cent at a time to
/// participants in the order given, so shares differ by at most one cent
/// and always sum to the total.
pub fn split_equally(amount_cents: i64, participants: &[UserId]) -> Result<Vec<Share>, ExpenseError> {
    if participants.is_empty() {
        return Err(ExpenseError::NoParticipants);
    }
    if amount_cents <= 0 {
        return Err(ExpenseError::NonPositiveAmount(amount_cents));
    }
    let count = participants.len() as i64;
    let base = amount_cents / count;
    let remainder = amount_cents % count;
    Ok(participants
        .iter()
        .enumerate()
        .map(|(i, user)| Share {
            user: user.clone(),
            amount_cents: base + i64::from((i as i64) < remainder),
        })
        .collect())
}

/// Check a hand-entered split.
pub fn validate_custom(amount_cents: i64, shares: &[Share]) -> Result<(), ExpenseError> {
    if shares.is_empty() {
        return Err(ExpenseError::NoParticipants);
    }
    if amount_cents <= 0 {
        return Err(ExpenseError::NonPositiveAmount(amount_cents));
    }
    if let Some(negative) = shares.iter().find(|s| s.amount_cents < 0) {
        return Err(ExpenseError::NegativeShare(negative.user.to_string()));
    }
    let actual: i64 = shares.iter().map(|s| s.amount_cents).sum();
    if actual != amount_cents {
        return Err(ExpenseError::SumMismatch {
            expected: amount_cents,
            actual,
        });
    }
    Ok(())
}

/// Net position per member: positive is owed money, negative owes money.
///
/// The payer is credited the full expense and each participant is debited
/// their share. A settled share has already been paid back, so it is
/// removed from both sides. Splits for unknown expenses are ignored.
pub fn balances(expenses: &[Expense], splits: &[ExpenseSplit]) -> BTreeMap<UserId, i64> {
    let mut balances: BTreeMap<UserId, i64> = BTreeMap::new();
    let payers: HashMap<&RecordId, &UserId> = expenses.iter().map(|e| (&e.id, &e.paid_by)).collect();
    for expense in expenses {
        *balances.entry(expense.paid_by.clone()).or_default() += expense.amount_cents;
    }
    for split in splits {
        let Some(payer) = payers.get(&split.expense_id) else {
            tracing::debug!(expense = %split.expense_id, "split for unknown expense ignored");
            continue;
        };
        if split.settled {
            *balances.entry((*payer).clone()).or_default() -= split.amount_cents;
        } else {
            *balances.entry(split.user_id.clone()).or_default() -= split.amount_cents;
        }
    }
    balances
}

/// Transfers that zero every balance.
///
/// Greedy: the largest debtor pays the largest creditor as much as one of
/// them needs, then both lists are re-ranked. Ties are broken by user id so
/// the result is deterministic.
pub fn settle_up(balances: &BTreeMap<UserId, i64>) -> Vec<Transfer> {
    let mut creditors: Vec<(UserId, i64)> = balances
        .iter()
        .filter(|(_, amount)| **amount > 0)
        .map(|(user, amount)| (user.clone(), *amount))
        .collect();
    let mut debtors: Vec<(UserId, i64)> = balances
        .iter()
        .filter(|(_, amount)| **amount < 0)
        .map(|(user, amount)| (user.clone(), -*amount))
        .collect();

    let mut transfers = Vec::new();
    loop {
        creditors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        debtors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (Some(creditor), Some(debtor)) = (creditors.first_mut(), debtors.first_mut()) else {
            break;
        };
        let amount = creditor.1.min(debtor.1);
        transfers.push(Transfer {
            from: debtor.0.clone(),
            to: creditor.0.clone(),
            amount_cents: amount,
        });
        creditor.1 -= amount;
        debtor.1 -= amount;
        creditors.retain(|(_, a)| *a > 0);
        debtors.retain(|(_, a)| *a > 0);
    }
    transfers
}
