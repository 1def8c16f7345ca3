//! `splitfair penalty`: run the penalty evaluator on a fresh store.

use anyhow::Result;

use splitfair::config::SplitfairConfig;
use splitfair::penalty::PenaltyStore;

pub fn cmd_penalty(config: &SplitfairConfig, person: &str, deltas: &[i64]) -> Result<()> {
    let mut store = PenaltyStore::new(config.thresholds());

    for delta in deltas {
        let consequence = store.add_points(person, *delta)?;
        let total = store.points(person);
        match consequence {
            Some(c) => println!(
                "{} +{} -> {} points: {} ({})",
                person,
                delta,
                total,
                console::style(format!("{} extra task(s)", c.extra_tasks)).yellow(),
                c.message
            ),
            None => println!("{} +{} -> {} points: no consequence", person, delta, total),
        }
    }

    Ok(())
}
