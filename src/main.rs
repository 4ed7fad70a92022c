mod commands;
mod render;
mod utils;

use anyhow::Result;
use calweave_core::config::CalweaveConfig;
use calweave_core::date_range::DateRange;
use calweave_core::intent::{CapturedIntent, DateHint, DomainTag};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calweave")]
#[command(about = "See all your calendars at once, catch conflicts and schedule what you capture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every provider and list overlapping events
    Conflicts {
        /// Look from this date (YYYY-MM-DD, or "start" for all past events)
        #[arg(long)]
        from: Option<String>,

        /// Look until this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Keep going when a provider fails instead of aborting
        #[arg(long)]
        resilient: bool,

        /// Print events, conflicts and failures as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn a captured thought into an event in the first free slot
    Capture {
        text: String,

        /// work, personal, health or other
        #[arg(short, long, default_value = "other")]
        domain: DomainTag,

        /// e.g. "30m", "1h 30m" or "45"
        #[arg(short = 't', long)]
        duration: Option<String>,

        /// YYYY-MM-DD, an exact RFC 3339 time, or "after <RFC 3339>"
        #[arg(long)]
        on: Option<String>,
    },
    /// List providers, their sign-in state and calendars
    Calendars,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = CalweaveConfig::load()?;
    tracing::debug!(
        providers = config.providers.len(),
        domains = config.domains.len(),
        "loaded config"
    );

    match cli.command {
        Commands::Conflicts {
            from,
            to,
            resilient,
            json,
        } => {
            require_providers(&config)?;
            let range = DateRange::from_args(from.as_deref(), to.as_deref())
                .map_err(|e| anyhow::anyhow!(e))?;
            commands::conflicts::run(config, range, resilient, json).await
        }
        Commands::Capture {
            text,
            domain,
            duration,
            on,
        } => {
            require_providers(&config)?;
            let mut intent = CapturedIntent::new(text, domain);
            if let Some(duration) = duration {
                intent = intent.with_duration(duration);
            }
            if let Some(on) = on {
                intent = intent.with_date(DateHint::parse(&on).map_err(|e| anyhow::anyhow!(e))?);
            }
            commands::capture::run(config, intent).await
        }
        Commands::Calendars => {
            require_providers(&config)?;
            commands::calendars::run(config).await
        }
    }
}

/// Logs go to stderr, filtered by `CALWEAVE_LOG` (default "warn").
fn init_logging() {
    let filter = EnvFilter::try_from_env("CALWEAVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_providers(config: &CalweaveConfig) -> Result<()> {
    if config.providers.is_empty() {
        let path = CalweaveConfig::config_path()?;
        anyhow::bail!(
            "No providers configured.\n\n\
            Add one to {}:\n  \
            [[providers]]\n  \
            id = \"home\"\n  \
            kind = \"second_party\"\n  \
            backend = \"memory\"",
            path.display()
        );
    }
    Ok(())
}
