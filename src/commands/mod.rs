pub mod calendars;
pub mod capture;
pub mod conflicts;

use std::sync::Arc;

use anyhow::Result;
use calweave_core::bus::EventBus;
use calweave_core::config::CalweaveConfig;
use calweave_core::manager::CalendarManager;
use calweave_core::provider;
use calweave_core::routing::StaticDomainRouter;
use calweave_core::scheduler::SmartScheduler;
use calweave_core::store::JsonDirStore;
use tokio_util::sync::CancellationToken;

/// Wire the configured providers, routes, hours and store into a manager.
pub fn build_manager(config: &CalweaveConfig) -> Result<CalendarManager> {
    let router = StaticDomainRouter::from_config(config)?;
    let scheduler = SmartScheduler::new(config.scheduling_policy()?);

    let mut manager = CalendarManager::new(config.manager.clone(), EventBus::new())
        .with_router(Arc::new(router))
        .with_scheduler(scheduler);

    if let Some(dir) = config.store_path() {
        manager = manager.with_store(Arc::new(JsonDirStore::new(dir)));
    }

    for provider_config in &config.providers {
        manager.add_provider(provider::from_config(provider_config)?)?;
    }

    Ok(manager)
}

/// A token that fires on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}
