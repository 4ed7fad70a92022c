use anyhow::Result;
use calweave_core::config::CalweaveConfig;
use calweave_core::date_range::DateRange;
use owo_colors::OwoColorize;

use crate::render::{Render, pluralize};
use crate::utils::tui;

use super::{build_manager, cancel_on_ctrl_c};

pub async fn run(
    mut config: CalweaveConfig,
    range: DateRange,
    resilient: bool,
    json: bool,
) -> Result<()> {
    if resilient {
        config.manager.abort_on_first_error = false;
    }
    let manager = build_manager(&config)?;
    let cancel = cancel_on_ctrl_c();

    let providers = manager.provider_ids().len();
    let spinner = tui::create_spinner(format!(
        "Fetching {} {}",
        providers,
        pluralize("provider", providers)
    ));
    let result = manager.fetch_all(&range, &cancel).await;
    spinner.finish_and_clear();
    let outcome = result?;

    if json {
        let failures: Vec<_> = outcome
            .failures
            .iter()
            .map(|f| serde_json::json!({ "provider": f.provider, "error": f.error.to_string() }))
            .collect();
        let report = serde_json::json!({
            "events": outcome.snapshot.events,
            "conflicts": outcome.snapshot.conflicts,
            "failures": failures,
            "rejected": outcome.rejected.len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for failure in &outcome.failures {
        println!("{}", failure.render());
    }
    if !outcome.rejected.is_empty() {
        let skipped = outcome.rejected.len();
        println!(
            "{}",
            format!("Skipped {} malformed {}", skipped, pluralize("event", skipped)).dimmed()
        );
    }
    if !outcome.failures.is_empty() || !outcome.rejected.is_empty() {
        println!();
    }

    let snapshot = &outcome.snapshot;
    let events = snapshot.events.len();
    if snapshot.conflicts.is_empty() {
        println!("No conflicts across {} {}.", events, pluralize("event", events));
        return Ok(());
    }

    for conflict in &snapshot.conflicts {
        println!("{}", conflict.render());
        for id in &conflict.event_ids {
            if let Some(event) = snapshot.event(id) {
                println!("   {}", event.render());
            }
        }
        println!("   {}", conflict.suggestion.dimmed());
        println!();
    }

    let conflicts = snapshot.conflicts.len();
    println!(
        "{} {} across {} {}",
        conflicts,
        pluralize("conflict", conflicts),
        events,
        pluralize("event", events)
    );

    Ok(())
}
