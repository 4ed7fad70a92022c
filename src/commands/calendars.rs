use anyhow::Result;
use calweave_core::config::CalweaveConfig;
use owo_colors::OwoColorize;

use crate::render::Render;
use crate::utils::tui;

use super::build_manager;

pub async fn run(config: CalweaveConfig) -> Result<()> {
    let manager = build_manager(&config)?;
    let providers = manager.provider_ids();

    for (i, id) in providers.iter().enumerate() {
        let spinner = tui::create_spinner(id.render());
        let result = manager.describe_provider(id).await;
        spinner.finish_and_clear();

        match result {
            Ok(provider) => println!("{}", provider.render()),
            Err(e) => {
                println!("{}", id.render());
                println!("   {}", e.to_string().red());
            }
        }

        if i < providers.len() - 1 {
            println!();
        }
    }

    let routes = config.domain_targets()?;
    if !routes.is_empty() || config.default_target.is_some() {
        println!("\nDomains:");
    }
    for (domain, target) in routes {
        let hours = target
            .hours
            .as_ref()
            .map(|h| format!(" {}-{}", h.start, h.end))
            .unwrap_or_default();
        println!(
            "   {} {} {}/{}{}",
            domain,
            "->".dimmed(),
            target.provider,
            target.calendar,
            hours.dimmed()
        );
    }
    if let Some(default) = &config.default_target {
        println!(
            "   {} {} {}/{}",
            "anything else".dimmed(),
            "->".dimmed(),
            default.provider,
            default.calendar
        );
    }

    Ok(())
}
