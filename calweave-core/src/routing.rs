//! Which provider and sub-calendar a captured intent lands in.

use std::collections::HashMap;

use crate::config::CalweaveConfig;
use crate::error::CalWeaveResult;
use crate::event::ProviderId;
use crate::intent::DomainTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarTarget {
    pub provider: ProviderId,
    pub calendar_id: String,
}

impl CalendarTarget {
    pub fn new(provider: impl Into<String>, calendar_id: impl Into<String>) -> Self {
        CalendarTarget {
            provider: ProviderId::new(provider.into()),
            calendar_id: calendar_id.into(),
        }
    }
}

/// Pluggable domain -> calendar mapping. Implementations may learn from
/// past placements; the manager only asks.
pub trait DomainRouter: Send + Sync {
    fn target(&self, domain: DomainTag) -> Option<CalendarTarget>;
}

/// Fixed mapping with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticDomainRouter {
    routes: HashMap<DomainTag, CalendarTarget>,
    fallback: Option<CalendarTarget>,
}

impl StaticDomainRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, domain: DomainTag, target: CalendarTarget) -> Self {
        self.routes.insert(domain, target);
        self
    }

    pub fn fallback(mut self, target: CalendarTarget) -> Self {
        self.fallback = Some(target);
        self
    }

    pub fn from_config(config: &CalweaveConfig) -> CalWeaveResult<Self> {
        let mut router = StaticDomainRouter::new();
        for (domain, target) in config.domain_targets()? {
            router = router.route(
                domain,
                CalendarTarget::new(target.provider.as_str(), target.calendar.as_str()),
            );
        }
        if let Some(default) = &config.default_target {
            router = router.fallback(CalendarTarget::new(
                default.provider.as_str(),
                default.calendar.as_str(),
            ));
        }
        Ok(router)
    }
}

impl DomainRouter for StaticDomainRouter {
    fn target(&self, domain: DomainTag) -> Option<CalendarTarget> {
        self.routes
            .get(&domain)
            .or(self.fallback.as_ref())
            .cloned()
    }
}
