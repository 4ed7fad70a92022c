use anyhow::Result;
use calweave_core::config::CalweaveConfig;
use calweave_core::date_range::DateRange;
use calweave_core::intent::CapturedIntent;
use calweave_core::manager::CaptureOutcome;
use calweave_core::scheduler::SlotConfidence;
use chrono::{Duration, Utc};
use owo_colors::OwoColorize;

use crate::render::Render;
use crate::utils::tui;

use super::{build_manager, cancel_on_ctrl_c};

pub async fn run(config: CalweaveConfig, intent: CapturedIntent) -> Result<()> {
    let manager = build_manager(&config)?;
    let cancel = cancel_on_ctrl_c();

    // Everything the scheduler could collide with, plus a day of slack
    let now = Utc::now();
    let start = intent
        .date_hint
        .as_ref()
        .map_or(now, |h| h.earliest().max(now));
    let range = DateRange::starting_at(
        start - Duration::days(1),
        i64::from(config.manager.search_horizon_days) + 2,
    );

    let spinner = tui::create_spinner("Checking calendars".to_string());
    let fetched = manager.fetch_all(&range, &cancel).await;
    spinner.finish_and_clear();
    let fetched = fetched?;
    for failure in &fetched.failures {
        println!("{}", failure.render());
    }

    let outcome = manager.create_from_intent(&intent, &cancel).await?;
    let snapshot = manager.snapshot();

    match outcome {
        CaptureOutcome::Created(event) => {
            println!("{} {}", "Created".green(), event.render());
            println!("   {}", format!("in {}/{}", event.provider, event.calendar_id).dimmed());
        }
        CaptureOutcome::Suggested {
            draft,
            conflicts,
            alternatives,
            confidence,
        } => {
            if confidence == SlotConfidence::Low {
                println!(
                    "{}",
                    format!(
                        "Nothing is free in the next {} days.",
                        config.manager.search_horizon_days
                    )
                    .yellow()
                );
            }

            println!("{} {}", "Proposed".yellow(), draft.render());
            let own = draft.event_ref();
            for conflict in &conflicts {
                for key in conflict.event_ids.iter().filter(|key| **key != own) {
                    if let Some(event) = snapshot.event(key) {
                        println!("   {} {}", "clashes with".red(), event.render());
                    }
                }
            }
            if conflicts.is_empty() && confidence == SlotConfidence::Certain {
                println!(
                    "   {}",
                    format!(
                        "too close to another event once {} buffers are counted",
                        humantime::format_duration(std::time::Duration::from_secs(
                            u64::from(config.manager.default_buffer_minutes) * 60
                        ))
                    )
                    .red()
                );
            }

            if !alternatives.is_empty() {
                println!("\nAlternatives:");
                for slot in &alternatives {
                    println!("   {}", slot.render());
                }
            }

            println!(
                "\n{}",
                "Nothing was written. Run again with --on <time> to pick a slot.".dimmed()
            );
        }
    }

    Ok(())
}
