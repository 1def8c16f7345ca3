//! `splitfair split`: equal split in cents.

use anyhow::Result;

use splitfair::common::UserId;
use splitfair::expenses::{format_cents, parse_amount, split_equally};

pub fn cmd_split(amount: &str, people: &[String]) -> Result<()> {
    let cents = parse_amount(amount)?;
    let participants: Vec<UserId> = people
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(UserId::from)
        .collect();
    let shares = split_equally(cents, &participants)?;

    let width = shares
        .iter()
        .map(|s| s.user.as_str().len())
        .chain(std::iter::once("total".len()))
        .max()
        .unwrap_or(0);
    for share in &shares {
        println!("{:<width$}  {}", share.user.as_str(), format_cents(share.amount_cents), width = width);
    }
    println!("{:<width$}  {}", "total", format_cents(cents), width = width);

    Ok(())
}
