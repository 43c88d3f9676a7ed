//! The update/delete walkthrough run by the `cachesync` binary.

use std::time::Duration;

use anyhow::{Context, bail};
use cachesync_core::events::DispatchMode;
use cachesync_storage::EntityStore;
use tracing::info;

use crate::model::User;
use crate::wiring::CacheSystem;

const DEMO_USER_ID: u64 = 42;

/// How long to wait for an async bus to deliver an event.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Create, read, update and delete one user, checking after each step that
/// the cache agrees with the store.
pub async fn run<S>(system: &CacheSystem<S, u64, User>) -> anyhow::Result<()>
where
    S: EntityStore<u64, User> + 'static,
{
    let id = DEMO_USER_ID;
    let cache = &system.cache;

    system
        .store
        .insert(id, User::new(id, "Alvin"))
        .await
        .context("insert demo user")?;
    let user = cache.get(&id).await?;
    info!(?user, "Loaded user through the cache");

    system
        .store
        .update(id, User::new(id, "Bob"))
        .await
        .context("update demo user")?;
    settle(system, Some("Bob")).await?;
    info!(user = ?cache.get(&id).await?, "Cache refreshed after update");

    system
        .store
        .delete(&id)
        .await
        .context("delete demo user")?;
    settle(system, None).await?;
    info!("Cache invalidated after delete");

    info!(
        cache = ?cache.stats(),
        coordinator = ?system.coordinator.stats(),
        "Demo finished"
    );
    Ok(())
}

/// Wait until the cache returns `expected` for the demo user. Inline
/// dispatch has applied the event already; async dispatch may lag.
async fn settle<S>(system: &CacheSystem<S, u64, User>, expected: Option<&str>) -> anyhow::Result<()>
where
    S: EntityStore<u64, User> + 'static,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let current = system.cache.get(&DEMO_USER_ID).await?;
        if current.as_ref().map(|u| u.name.as_str()) == expected {
            return Ok(());
        }
        if system.bus.mode() == DispatchMode::Inline || tokio::time::Instant::now() >= deadline {
            bail!("cache returned {current:?}, expected {expected:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
