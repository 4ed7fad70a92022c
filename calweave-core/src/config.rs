//! Configuration for calweave.
//!
//! Global configuration lives at ~/.config/calweave/config.toml and is
//! layered with `CALWEAVE_`-prefixed environment variables
//! (e.g. `CALWEAVE_MANAGER__ABORT_ON_FIRST_ERROR=false`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CalWeaveError, CalWeaveResult};
use crate::intent::DomainTag;
use crate::provider::ProviderKind;
use crate::scheduler::{DailyWindow, SchedulingPolicy};

fn default_true() -> bool {
    true
}

fn default_buffer_minutes() -> u32 {
    15
}

fn default_search_horizon_days() -> u32 {
    7
}

fn default_duration_minutes() -> u32 {
    60
}

fn default_reminder_minutes() -> u32 {
    10
}

/// Options recognized by the calendar manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// All-or-nothing fetch when true; collect per-provider errors when false
    #[serde(default = "default_true")]
    pub abort_on_first_error: bool,

    #[serde(default = "default_buffer_minutes")]
    pub default_buffer_minutes: u32,

    #[serde(default = "default_search_horizon_days")]
    pub search_horizon_days: u32,

    /// Offer a low-confidence slot past the horizon instead of failing
    #[serde(default = "default_true")]
    pub low_confidence_fallback: bool,

    /// Used when an intent carries no readable duration
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,

    #[serde(default = "default_reminder_minutes")]
    pub reminder_minutes: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            abort_on_first_error: true,
            default_buffer_minutes: default_buffer_minutes(),
            search_horizon_days: default_search_horizon_days(),
            low_confidence_fallback: true,
            default_duration_minutes: default_duration_minutes(),
            reminder_minutes: default_reminder_minutes(),
        }
    }
}

/// Backend selection for one provider. A closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ProviderBackend {
    /// External `calweave-provider-<name>` binary speaking the JSON protocol
    Subprocess {
        name: String,
        #[serde(default)]
        params: HashMap<String, toml::Value>,
    },
    /// In-process store, optionally seeded from a JSON file of events
    Memory {
        #[serde(default)]
        seed: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(flatten)]
    pub backend: ProviderBackend,
}

/// Daily hours as "HH:MM" strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursConfig {
    pub start: String,
    pub end: String,
}

impl HoursConfig {
    pub fn to_window(&self) -> CalWeaveResult<DailyWindow> {
        let start = parse_time(&self.start)?;
        let end = parse_time(&self.end)?;
        if end <= start {
            return Err(CalWeaveError::Config(format!(
                "Hours {}-{} must end after they start",
                self.start, self.end
            )));
        }
        Ok(DailyWindow::new(start, end))
    }
}

fn parse_time(s: &str) -> CalWeaveResult<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| CalWeaveError::Config(format!("Invalid time '{}'. Expected HH:MM", s)))
}

/// Where events of one domain go, and when they may be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub provider: String,
    pub calendar: String,
    #[serde(default)]
    pub hours: Option<HoursConfig>,
}

/// Target for domains without their own entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTarget {
    pub provider: String,
    pub calendar: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalweaveConfig {
    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Keyed by domain tag name ("work", "personal", ...)
    #[serde(default)]
    pub domains: HashMap<String, DomainConfig>,

    #[serde(default)]
    pub default_target: Option<DefaultTarget>,

    /// Directory finalized events are saved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

impl CalweaveConfig {
    pub fn config_path() -> CalWeaveResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalWeaveError::Config("Could not determine config directory".into()))?
            .join("calweave");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, creating a commented default file first if missing.
    pub fn load() -> CalWeaveResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            Self::create_default_config(&path)?;
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> CalWeaveResult<Self> {
        let config: CalweaveConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("CALWEAVE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CalWeaveError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalWeaveError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CalWeaveResult<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(CalWeaveError::Config(format!(
                    "Provider id '{}' is configured twice",
                    provider.id
                )));
            }
        }

        for (domain, target) in self.domain_targets()? {
            if !seen.contains(target.provider.as_str()) {
                return Err(CalWeaveError::Config(format!(
                    "Domain '{}' targets unknown provider '{}'",
                    domain, target.provider
                )));
            }
        }

        self.scheduling_policy().map(|_| ())
    }

    /// `[domains.<tag>]` entries with their tags parsed.
    pub fn domain_targets(&self) -> CalWeaveResult<Vec<(DomainTag, &DomainConfig)>> {
        let mut targets = self
            .domains
            .iter()
            .map(|(tag, target)| {
                tag.parse::<DomainTag>()
                    .map(|domain| (domain, target))
                    .map_err(CalWeaveError::Config)
            })
            .collect::<CalWeaveResult<Vec<_>>>()?;
        targets.sort_by_key(|(domain, _)| *domain);
        Ok(targets)
    }

    /// Per-domain windows from `[domains.<tag>.hours]`.
    pub fn scheduling_policy(&self) -> CalWeaveResult<SchedulingPolicy> {
        let mut policy = SchedulingPolicy::default();
        for (domain, target) in self.domain_targets()? {
            if let Some(hours) = &target.hours {
                policy = policy.with_window(domain, hours.to_window()?);
            }
        }
        Ok(policy)
    }

    /// Store directory with `~` expanded.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store_dir
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalWeaveResult<()> {
        let contents = "\
# calweave configuration

# [manager]
# abort_on_first_error = true
# default_buffer_minutes = 15
# search_horizon_days = 7
# low_confidence_fallback = true
# default_duration_minutes = 60

# [[providers]]
# id = \"work\"
# kind = \"first_party\"
# backend = \"subprocess\"
# name = \"google\"
# params = { account = \"me@example.com\" }

# [[providers]]
# id = \"home\"
# kind = \"second_party\"
# backend = \"memory\"
# seed = \"~/calendar/home.json\"

# [domains.work]
# provider = \"work\"
# calendar = \"primary\"
# hours = { start = \"09:00\", end = \"17:00\" }

# [default_target]
# provider = \"home\"
# calendar = \"primary\"

# store_dir = \"~/calendar/calweave\"
";

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalWeaveError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalWeaveError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
