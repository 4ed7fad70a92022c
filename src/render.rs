//! TUI rendering traits for calweave types.
//!
//! Extension traits that add colored terminal rendering to calweave-core
//! types using owo_colors.

use calweave_core::conflict::{CalendarConflict, Severity};
use calweave_core::manager::ProviderFailure;
use calweave_core::provider::{AuthState, CalendarProviderRef};
use calweave_core::{ProviderId, TimeSlot, UnifiedCalendarEvent};
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for ProviderId {
    fn render(&self) -> String {
        format!("📅 {}", self)
    }
}

impl Render for UnifiedCalendarEvent {
    fn render(&self) -> String {
        let time = if self.is_all_day() {
            format!("{} (all day)", self.start_utc().format("%Y-%m-%d"))
        } else {
            self.slot().to_string()
        };

        let mut line = format!("{} {}", self.title, time.dimmed());
        if let Some(location) = self.effective_location() {
            line.push_str(&format!(" @ {}", location));
        }
        format!("{} {}", line, format!("[{}]", self.provider).dimmed())
    }
}

impl Render for TimeSlot {
    fn render(&self) -> String {
        let length = self.duration().to_std().unwrap_or_default();
        format!("{} ({})", self, humantime::format_duration(length))
    }
}

impl Render for CalendarConflict {
    fn render(&self) -> String {
        let label = format!("{} {}", self.severity, self.kind);
        let label = match self.severity {
            Severity::High => label.red().to_string(),
            Severity::Medium => label.yellow().to_string(),
            Severity::Low => label.dimmed().to_string(),
        };
        format!("{} {}", "!".bold(), label)
    }
}

impl Render for ProviderFailure {
    fn render(&self) -> String {
        format!("{} {}", self.provider.render(), self.error.to_string().red())
    }
}

impl Render for CalendarProviderRef {
    fn render(&self) -> String {
        let auth = match self.auth {
            AuthState::Authenticated => "signed in".green().to_string(),
            AuthState::Unauthenticated => "signed out".red().to_string(),
        };
        let mut lines = vec![format!("{} {} {}", self.id.render(), self.kind.dimmed(), auth)];

        let default = self.default_calendar().map(|c| c.id.as_str());
        for calendar in &self.calendars {
            let marker = if Some(calendar.id.as_str()) == default {
                " (default)".dimmed().to_string()
            } else {
                String::new()
            };
            lines.push(format!("   {} {}{}", calendar.title, calendar.id.dimmed(), marker));
        }
        lines.join("\n")
    }
}

pub fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}
